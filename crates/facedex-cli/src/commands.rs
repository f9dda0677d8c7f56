use crate::output::{
    data_url, AddOutcome, NameSearchResponse, SearchResponse, UpdateOutcome, NO_FACE_DETECTED,
    NO_MATCH_FOUND,
};
use anyhow::{ensure, Context, Result};
use facedex_core::{
    compare_faces, decode_image, load_image, Embedding, EuclideanMatcher, FaceEncoder, Matcher,
};
use facedex_store::Store;
use std::path::{Path, PathBuf};

/// Create the schema.
pub fn init_db(store: &Store) -> Result<()> {
    store.init().context("failed to create schema")?;
    tracing::info!("database initialized");
    Ok(())
}

/// Enroll `name` from the faces found in `image_paths`.
///
/// Each image contributes its most confident face; the first contributing
/// image becomes the person's main image. Unreadable images abort before
/// anything is written.
pub fn add_person(
    store: &mut Store,
    encoder: &mut dyn FaceEncoder,
    name: &str,
    image_paths: &[PathBuf],
    max_images: usize,
) -> Result<AddOutcome> {
    ensure!(max_images > 0, "image cap must be at least 1");
    let mut enrolled: Vec<(Embedding, Vec<u8>)> = Vec::new();

    for path in image_paths {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        let image = decode_image(&bytes)
            .with_context(|| format!("failed to decode image {}", path.display()))?;

        let faces = encoder
            .encode(&image)
            .with_context(|| format!("failed to encode {}", path.display()))?;
        match faces.into_iter().next() {
            Some(face) => enrolled.push((face, bytes)),
            None => tracing::info!(path = %path.display(), "no face found"),
        }
    }

    if enrolled.len() > max_images {
        tracing::warn!(
            found = enrolled.len(),
            max_images,
            "too many images for one person; keeping the first ones"
        );
        enrolled.truncate(max_images);
    }

    let Some((_, main_image)) = enrolled.first() else {
        return Ok(AddOutcome::NoFaces);
    };
    let main_image = main_image.clone();
    let embeddings: Vec<Embedding> = enrolled.into_iter().map(|(e, _)| e).collect();
    let person = store.add_person(name, &main_image, &embeddings)?;

    Ok(AddOutcome::Added {
        name: person.name,
        person_id: person.id,
        images: embeddings.len(),
    })
}

/// Append embeddings from `image_paths` to every person named `name` whose
/// stored faces match within `tolerance`, up to `max_images` per person.
///
/// Every image is loaded and encoded before the first append, so an
/// unreadable image leaves the database untouched.
pub fn update_person(
    store: &Store,
    encoder: &mut dyn FaceEncoder,
    name: &str,
    image_paths: &[PathBuf],
    tolerance: f64,
    max_images: usize,
) -> Result<Vec<UpdateOutcome>> {
    let people = store.people_named(name)?;
    if people.is_empty() {
        return Ok(vec![UpdateOutcome::UnknownPerson {
            name: name.to_string(),
        }]);
    }

    let mut candidates = Vec::with_capacity(image_paths.len());
    for path in image_paths {
        candidates.push((path, first_face(encoder, path)?));
    }

    let mut outcomes = Vec::new();
    for (path, candidate) in candidates {
        let Some(candidate) = candidate else {
            outcomes.push(UpdateOutcome::NoFace);
            continue;
        };

        for person in &people {
            let known: Vec<Embedding> = store
                .embeddings_for(person.id)?
                .into_iter()
                .map(|s| s.embedding)
                .collect();
            let matches = compare_faces(&known, &candidate, tolerance)
                .with_context(|| format!("cannot compare against person {}", person.id))?;

            let name = person.name.clone();
            let person_id = person.id;
            if !matches.contains(&true) {
                tracing::info!(person_id, path = %path.display(), "face does not match");
                outcomes.push(UpdateOutcome::NoMatch { name, person_id });
            } else if store.image_count(person_id)? >= max_images {
                outcomes.push(UpdateOutcome::CapReached { name, person_id });
            } else {
                store.add_embedding(person_id, &candidate)?;
                outcomes.push(UpdateOutcome::Updated { name, person_id });
            }
        }
    }

    Ok(outcomes)
}

/// Identify the person in `image_path`.
///
/// Every detected face is scanned against every stored embedding; the
/// closest match within `tolerance` wins.
pub fn search_person(
    store: &Store,
    encoder: &mut dyn FaceEncoder,
    image_path: &Path,
    tolerance: f64,
) -> Result<SearchResponse> {
    let image = load_image(image_path)?;
    let faces = encoder.encode(&image)?;
    if faces.is_empty() {
        return Ok(SearchResponse::message(NO_FACE_DETECTED));
    }

    let gallery = store.gallery()?;
    tracing::debug!(faces = faces.len(), gallery = gallery.len(), "searching");

    let mut best: Option<(f64, i64)> = None;
    for face in &faces {
        let result = EuclideanMatcher.best_match(face, &gallery, tolerance)?;
        if let (true, Some(distance), Some(owner)) = (result.matched, result.distance, result.owner_id) {
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, owner));
            }
        }
    }

    let Some((distance, person_id)) = best else {
        return Ok(SearchResponse::message(NO_MATCH_FOUND));
    };
    let person = store
        .person(person_id)?
        .with_context(|| format!("embedding owner {person_id} has no person row"))?;

    tracing::info!(person_id, name = %person.name, distance, "match found");
    Ok(SearchResponse::found(&person.name, &person.main_image))
}

/// Look up enrolled people by exact name.
pub fn search_name(store: &Store, name: &str) -> Result<NameSearchResponse> {
    let people = store.summaries_named(name)?;
    let Some(first) = people.first() else {
        return Ok(NameSearchResponse {
            found: format!("No person named {name} found in the database."),
            main_image: String::new(),
            people,
        });
    };

    let main_image = store
        .person(first.id)?
        .map(|p| data_url(&p.main_image))
        .unwrap_or_default();

    Ok(NameSearchResponse {
        found: name.to_string(),
        main_image,
        people,
    })
}

fn first_face(encoder: &mut dyn FaceEncoder, path: &Path) -> Result<Option<Embedding>> {
    let image = load_image(path)?;
    let faces = encoder
        .encode(&image)
        .with_context(|| format!("failed to encode {}", path.display()))?;
    Ok(faces.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facedex_core::EncoderError;
    use image::{GrayImage, Luma};
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Encoder keyed on the top-left pixel value of the image.
    struct StubEncoder {
        faces: HashMap<u8, Vec<Embedding>>,
    }

    impl FaceEncoder for StubEncoder {
        fn encode(&mut self, image: &GrayImage) -> Result<Vec<Embedding>, EncoderError> {
            let key = image.get_pixel(0, 0)[0];
            Ok(self.faces.get(&key).cloned().unwrap_or_default())
        }
    }

    struct Fixture {
        dir: TempDir,
        store: Store,
        encoder: StubEncoder,
    }

    const NOBODY: u8 = 0;
    const ADA: u8 = 10;
    const ADA_AGAIN: u8 = 11;
    const GRACE: u8 = 20;
    const TWO_FACES: u8 = 30;

    fn emb(values: &[f64]) -> Embedding {
        Embedding::new(values.to_vec())
    }

    fn fixture() -> Fixture {
        let store = Store::open_in_memory().unwrap();
        init_db(&store).unwrap();

        let faces = HashMap::from([
            (ADA, vec![emb(&[0.0, 0.0])]),
            (ADA_AGAIN, vec![emb(&[0.1, 0.0])]),
            (GRACE, vec![emb(&[5.0, 5.0])]),
            (TWO_FACES, vec![emb(&[9.0, 9.0]), emb(&[5.1, 5.0])]),
        ]);

        Fixture {
            dir: tempfile::tempdir().unwrap(),
            store,
            encoder: StubEncoder { faces },
        }
    }

    impl Fixture {
        /// Write a PNG whose pixels all equal `key`.
        fn photo(&self, file: &str, key: u8) -> PathBuf {
            let path = self.dir.path().join(file);
            GrayImage::from_pixel(4, 4, Luma([key])).save(&path).unwrap();
            path
        }

        fn enroll(&mut self, name: &str, key: u8) -> i64 {
            let photo = self.photo(&format!("{name}-{key}.png"), key);
            match add_person(&mut self.store, &mut self.encoder, name, &[photo], 10).unwrap() {
                AddOutcome::Added { person_id, .. } => person_id,
                other => panic!("enrollment failed: {other:?}"),
            }
        }
    }

    #[test]
    fn test_add_person_single_face_writes_one_person_one_image() {
        let mut fx = fixture();
        let photo = fx.photo("ada.png", ADA);
        let outcome = add_person(&mut fx.store, &mut fx.encoder, "ada", &[photo.clone()], 10).unwrap();

        assert_eq!(outcome.to_string(), "Added ada to the database.");
        let people = fx.store.people().unwrap();
        assert_eq!(people.len(), 1);
        assert_eq!(fx.store.image_count(people[0].id).unwrap(), 1);
        assert_eq!(people[0].main_image, std::fs::read(&photo).unwrap());
    }

    #[test]
    fn test_add_person_without_faces_writes_nothing() {
        let mut fx = fixture();
        let photo = fx.photo("empty.png", NOBODY);
        let outcome = add_person(&mut fx.store, &mut fx.encoder, "ada", &[photo], 10).unwrap();

        assert_eq!(outcome, AddOutcome::NoFaces);
        assert_eq!(outcome.to_string(), "No faces found in the images.");
        assert!(fx.store.people().unwrap().is_empty());
    }

    #[test]
    fn test_add_person_main_image_is_first_image_with_a_face() {
        let mut fx = fixture();
        let empty = fx.photo("empty.png", NOBODY);
        let first = fx.photo("first.png", ADA);
        let second = fx.photo("second.png", ADA_AGAIN);

        add_person(&mut fx.store, &mut fx.encoder, "ada", &[empty, first.clone(), second], 10).unwrap();

        let person = &fx.store.people().unwrap()[0];
        assert_eq!(person.main_image, std::fs::read(first).unwrap());
        assert_eq!(fx.store.image_count(person.id).unwrap(), 2);
    }

    #[test]
    fn test_add_person_caps_images() {
        let mut fx = fixture();
        let paths: Vec<PathBuf> = (0..4).map(|i| fx.photo(&format!("{i}.png"), ADA)).collect();
        let outcome = add_person(&mut fx.store, &mut fx.encoder, "ada", &paths, 2).unwrap();

        assert!(matches!(outcome, AddOutcome::Added { images: 2, .. }));
    }

    #[test]
    fn test_add_person_unreadable_image_writes_nothing() {
        let mut fx = fixture();
        let good = fx.photo("ada.png", ADA);
        let missing = fx.dir.path().join("missing.png");

        let err = add_person(&mut fx.store, &mut fx.encoder, "ada", &[good, missing], 10).unwrap_err();
        assert!(err.to_string().contains("missing.png"));
        assert!(fx.store.people().unwrap().is_empty());
    }

    #[test]
    fn test_add_person_zero_cap_writes_nothing() {
        let mut fx = fixture();
        let photo = fx.photo("ada.png", ADA);

        let err = add_person(&mut fx.store, &mut fx.encoder, "ada", &[photo], 0).unwrap_err();
        assert!(err.to_string().contains("at least 1"), "{err}");
        assert!(fx.store.people().unwrap().is_empty());
    }

    #[test]
    fn test_update_unknown_person() {
        let mut fx = fixture();
        let photo = fx.photo("ada.png", ADA);
        let outcomes = update_person(&fx.store, &mut fx.encoder, "nobody", &[photo], 0.7, 10).unwrap();
        assert_eq!(outcomes, vec![UpdateOutcome::UnknownPerson { name: "nobody".into() }]);
    }

    #[test]
    fn test_update_matching_face_appends() {
        let mut fx = fixture();
        let id = fx.enroll("ada", ADA);
        let photo = fx.photo("again.png", ADA_AGAIN);

        let outcomes = update_person(&fx.store, &mut fx.encoder, "ada", &[photo], 0.7, 10).unwrap();
        assert_eq!(outcomes, vec![UpdateOutcome::Updated { name: "ada".into(), person_id: id }]);
        assert_eq!(fx.store.image_count(id).unwrap(), 2);
    }

    #[test]
    fn test_update_mismatched_face_is_rejected() {
        let mut fx = fixture();
        let id = fx.enroll("ada", ADA);
        let photo = fx.photo("grace.png", GRACE);

        let outcomes = update_person(&fx.store, &mut fx.encoder, "ada", &[photo], 0.7, 10).unwrap();
        assert_eq!(outcomes, vec![UpdateOutcome::NoMatch { name: "ada".into(), person_id: id }]);
        assert_eq!(fx.store.image_count(id).unwrap(), 1);
    }

    #[test]
    fn test_update_beyond_cap_is_rejected() {
        let mut fx = fixture();
        let id = fx.enroll("ada", ADA);
        let a = fx.photo("a.png", ADA_AGAIN);
        let b = fx.photo("b.png", ADA_AGAIN);

        let outcomes = update_person(&fx.store, &mut fx.encoder, "ada", &[a, b], 0.7, 2).unwrap();
        assert_eq!(
            outcomes,
            vec![
                UpdateOutcome::Updated { name: "ada".into(), person_id: id },
                UpdateOutcome::CapReached { name: "ada".into(), person_id: id },
            ]
        );
        assert_eq!(fx.store.image_count(id).unwrap(), 2);
    }

    #[test]
    fn test_update_no_face() {
        let mut fx = fixture();
        fx.enroll("ada", ADA);
        let photo = fx.photo("empty.png", NOBODY);
        let outcomes = update_person(&fx.store, &mut fx.encoder, "ada", &[photo], 0.7, 10).unwrap();
        assert_eq!(outcomes, vec![UpdateOutcome::NoFace]);
    }

    #[test]
    fn test_update_unreadable_image_writes_nothing() {
        let mut fx = fixture();
        let id = fx.enroll("ada", ADA);
        let good = fx.photo("again.png", ADA_AGAIN);
        let missing = fx.dir.path().join("missing.png");

        let err = update_person(&fx.store, &mut fx.encoder, "ada", &[good, missing], 0.7, 10)
            .unwrap_err();
        assert!(format!("{err:#}").contains("missing.png"), "{err:#}");
        assert_eq!(fx.store.image_count(id).unwrap(), 1);
    }

    #[test]
    fn test_update_checks_every_namesake() {
        let mut fx = fixture();
        let ada = fx.enroll("sam", ADA);
        let grace = fx.enroll("sam", GRACE);
        let photo = fx.photo("again.png", ADA_AGAIN);

        let outcomes = update_person(&fx.store, &mut fx.encoder, "sam", &[photo], 0.7, 10).unwrap();
        assert_eq!(
            outcomes,
            vec![
                UpdateOutcome::Updated { name: "sam".into(), person_id: ada },
                UpdateOutcome::NoMatch { name: "sam".into(), person_id: grace },
            ]
        );
    }

    #[test]
    fn test_search_finds_enrolled_person() {
        let mut fx = fixture();
        fx.enroll("ada", ADA);
        fx.enroll("grace", GRACE);
        let query = fx.photo("query.png", ADA_AGAIN);

        let resp = search_person(&fx.store, &mut fx.encoder, &query, 0.6).unwrap();
        assert_eq!(resp.found, "ada");
        assert!(resp.main_image.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn test_search_uses_closest_face_across_all_faces() {
        let mut fx = fixture();
        fx.enroll("ada", ADA);
        fx.enroll("grace", GRACE);
        let query = fx.photo("group.png", TWO_FACES);

        let resp = search_person(&fx.store, &mut fx.encoder, &query, 0.6).unwrap();
        assert_eq!(resp.found, "grace");
    }

    #[test]
    fn test_search_no_face() {
        let mut fx = fixture();
        fx.enroll("ada", ADA);
        let query = fx.photo("empty.png", NOBODY);

        let resp = search_person(&fx.store, &mut fx.encoder, &query, 0.6).unwrap();
        assert_eq!(resp, SearchResponse::message(NO_FACE_DETECTED));
    }

    #[test]
    fn test_search_no_match() {
        let mut fx = fixture();
        fx.enroll("grace", GRACE);
        let query = fx.photo("query.png", ADA);

        let resp = search_person(&fx.store, &mut fx.encoder, &query, 0.6).unwrap();
        assert_eq!(resp, SearchResponse::message(NO_MATCH_FOUND));
    }

    #[test]
    fn test_search_empty_database() {
        let mut fx = fixture();
        let query = fx.photo("query.png", ADA);
        let resp = search_person(&fx.store, &mut fx.encoder, &query, 0.6).unwrap();
        assert_eq!(resp.found, NO_MATCH_FOUND);
    }

    #[test]
    fn test_search_missing_image_is_an_error() {
        let mut fx = fixture();
        let missing = fx.dir.path().join("nope.jpg");
        assert!(search_person(&fx.store, &mut fx.encoder, &missing, 0.6).is_err());
    }

    #[test]
    fn test_search_name() {
        let mut fx = fixture();
        let first = fx.enroll("sam", ADA);
        let second = fx.enroll("sam", GRACE);

        let resp = search_name(&fx.store, "sam").unwrap();
        assert_eq!(resp.found, "sam");
        assert!(resp.main_image.starts_with("data:image/png;base64,"));
        let ids: Vec<i64> = resp.people.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![first, second]);
    }

    #[test]
    fn test_search_name_unknown() {
        let fx = fixture();
        let resp = search_name(&fx.store, "nobody").unwrap();
        assert_eq!(resp.found, "No person named nobody found in the database.");
        assert!(resp.main_image.is_empty());
        assert!(resp.people.is_empty());
    }
}
