//! End-to-end document scenarios against the reference in-memory
//! backend: CRUD, partial reads, nested models, subdocuments,
//! references, enumeration, and reloading.

use docmap_core::{
    document::{Attrs, AttrValue, Document, Presence},
    error::Error,
    model::{registry::Registry, FieldKind, ModelSchema},
    record::RecordStub,
    selection::FieldSelection,
    session::Session,
    store::MemoryStore,
    value::Value,
};
use serde_json::json;
use std::sync::Arc;

fn movie_only_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
            ModelSchema::document("Movie")
                .field("title", FieldKind::Text)
                .optional("year", FieldKind::Int)
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

fn root_session(registry: Registry) -> (Session, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let session = Session::root(registry, store.clone()).unwrap();
    (session, store)
}

#[tokio::test]
async fn crud_operations() {
    let (root, _) = root_session(movie_only_registry());
    let session = root.fork();
    let movies = session.collection("Movie").unwrap();

    // Create
    let movie = movies
        .create(Attrs::new().set("title", "Inception").set("year", 2010))
        .unwrap();
    let id = movie.id().to_string();
    assert!(movie.is_new());
    movie.save().await.unwrap();
    assert!(!movie.is_new());

    // Read resolves to the very same instance within the session.
    let again = movies.get(&id).await.unwrap();
    assert!(Document::ptr_eq(&movie, &again));
    assert_eq!(again.text("title").unwrap().as_deref(), Some("Inception"));
    assert_eq!(again.int("year").unwrap(), Some(2010));

    // A fork sees the same record as a fresh instance.
    let other = root.fork();
    let other_movies = other.collection("Movie").unwrap();
    let fresh = other_movies.get(&id).await.unwrap();
    assert!(!Document::ptr_eq(&movie, &fresh));
    assert_eq!(fresh.text("title").unwrap().as_deref(), Some("Inception"));
    assert_eq!(fresh.int("year").unwrap(), Some(2010));

    // Missing ids.
    let err = movies.get("missing-id").await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
    assert!(movies.try_get("missing-id").await.unwrap().is_none());

    // Partial read against a cached instance keeps cached fields.
    let partial = movies
        .get_with(&id, &FieldSelection::only(["title"]))
        .await
        .unwrap();
    assert!(Document::ptr_eq(&movie, &partial));
    assert_eq!(partial.int("year").unwrap(), Some(2010));

    // Partial read in a fresh fork fetches only what was asked.
    let other = root.fork();
    let other_movies = other.collection("Movie").unwrap();
    let partial = other_movies
        .get_with(&id, &FieldSelection::only(["title"]))
        .await
        .unwrap();
    assert_eq!(partial.text("title").unwrap().as_deref(), Some("Inception"));
    assert!(partial.presence("year").unwrap().is_unknown());

    // A second partial read merges into the same instance.
    let widened = other_movies
        .get_with(&id, &FieldSelection::only(["year"]))
        .await
        .unwrap();
    assert!(Document::ptr_eq(&partial, &widened));
    assert_eq!(widened.text("title").unwrap().as_deref(), Some("Inception"));
    assert_eq!(widened.int("year").unwrap(), Some(2010));

    // Existence check: identity only, both fields stay unknown.
    let other = root.fork();
    let other_movies = other.collection("Movie").unwrap();
    let shell = other_movies
        .get_with(&id, &FieldSelection::fields())
        .await
        .unwrap();
    assert_eq!(shell.id(), id);
    assert!(shell.presence("title").unwrap().is_unknown());
    assert!(shell.presence("year").unwrap().is_unknown());
    assert_eq!(
        serde_json::to_value(shell.to_record()).unwrap(),
        json!({"_type": "Movie", "_id": id})
    );

    // Update
    movie.set("title", "The Matrix").unwrap();
    movie.save().await.unwrap();
    let other = root.fork();
    let updated = other.collection("Movie").unwrap().get(&id).await.unwrap();
    assert_eq!(updated.text("title").unwrap().as_deref(), Some("The Matrix"));
    assert_eq!(updated.int("year").unwrap(), Some(2010));

    // Clearing an optional field unsets it in storage.
    movie.unset("year").unwrap();
    movie.save().await.unwrap();
    let other = root.fork();
    let cleared = other.collection("Movie").unwrap().get(&id).await.unwrap();
    assert_eq!(cleared.text("title").unwrap().as_deref(), Some("The Matrix"));
    assert!(cleared.presence("year").unwrap().is_absent());

    // Delete
    movie.delete().await.unwrap();
    assert!(movies.try_get(&id).await.unwrap().is_none());
    let other = root.fork();
    assert!(other
        .collection("Movie")
        .unwrap()
        .try_get(&id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn required_fields_cannot_be_cleared() {
    let (root, _) = root_session(movie_only_registry());
    let movies = root.collection("Movie").unwrap();
    let movie = movies
        .create(Attrs::new().set("title", "Inception"))
        .unwrap();

    let err = movie.unset("title").unwrap_err();
    assert!(matches!(err, Error::InvalidValue { .. }));
}

#[tokio::test]
async fn scalar_type_mismatches_are_rejected_on_assignment() {
    let (root, _) = root_session(movie_only_registry());
    let movies = root.collection("Movie").unwrap();
    let movie = movies
        .create(Attrs::new().set("title", "Inception"))
        .unwrap();

    assert!(matches!(
        movie.set("title", 5).unwrap_err(),
        Error::TypeMismatch { .. }
    ));
    assert!(matches!(
        movie.set("year", "not a year").unwrap_err(),
        Error::TypeMismatch { .. }
    ));
}

#[tokio::test]
async fn nested_value_models() {
    let mut registry = Registry::new();
    registry
        .register(
            ModelSchema::document("Movie")
                .field("title", FieldKind::Text)
                .field("technical_specs", FieldKind::embedded("TechnicalSpecs"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            ModelSchema::value("TechnicalSpecs")
                .field("color", FieldKind::Bool)
                .field("aspect_ratio", FieldKind::Text)
                .build()
                .unwrap(),
        )
        .unwrap();

    let (root, _) = root_session(registry);

    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .create(
            Attrs::new().set("title", "Inception").set(
                "technical_specs",
                Attrs::new().set("color", true).set("aspect_ratio", "2.39:1"),
            ),
        )
        .unwrap();
    let id = movie.id().to_string();
    movie.save().await.unwrap();

    // Full fetch materializes the nested instance.
    let session = root.fork();
    let movie = session.collection("Movie").unwrap().get(&id).await.unwrap();
    let specs = movie.entity("technical_specs").unwrap().unwrap();
    assert_eq!(specs.model_name(), "TechnicalSpecs");
    assert_eq!(specs.bool("color").unwrap(), Some(true));
    assert_eq!(specs.text("aspect_ratio").unwrap().as_deref(), Some("2.39:1"));

    // Partial fetch recurses the selection into the nested model, then
    // a load widens it without clobbering what is known.
    let session = root.fork();
    let selection = FieldSelection::fields()
        .field("title", FieldSelection::All)
        .field("technical_specs", FieldSelection::only(["color"]));
    let movie = session
        .collection("Movie")
        .unwrap()
        .get_with(&id, &selection)
        .await
        .unwrap();
    let specs = movie.entity("technical_specs").unwrap().unwrap();
    assert_eq!(specs.bool("color").unwrap(), Some(true));
    assert!(specs.presence("aspect_ratio").unwrap().is_unknown());

    movie
        .load_with(
            &FieldSelection::fields()
                .field("technical_specs", FieldSelection::only(["aspect_ratio"])),
        )
        .await
        .unwrap();
    assert_eq!(movie.text("title").unwrap().as_deref(), Some("Inception"));
    assert_eq!(specs.bool("color").unwrap(), Some(true));
    assert_eq!(specs.text("aspect_ratio").unwrap().as_deref(), Some("2.39:1"));

    // Delete removes the document everywhere.
    let session = root.fork();
    let movie = session.collection("Movie").unwrap().get(&id).await.unwrap();
    movie.delete().await.unwrap();
    assert!(session
        .collection("Movie")
        .unwrap()
        .try_get(&id)
        .await
        .unwrap()
        .is_none());
    let session = root.fork();
    assert!(session
        .collection("Movie")
        .unwrap()
        .try_get(&id)
        .await
        .unwrap()
        .is_none());
}

fn trailer_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
            ModelSchema::document("Movie")
                .field("title", FieldKind::Text)
                .field("trailer", FieldKind::embedded("Trailer"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            ModelSchema::subdocument("Trailer")
                .field("url", FieldKind::Text)
                .optional("duration", FieldKind::Int)
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn subdocuments_cascade_with_their_owner() {
    let (root, store) = root_session(trailer_registry());

    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .create(
            Attrs::new().set("title", "Inception").set(
                "trailer",
                Attrs::new()
                    .set("url", "https://example.org/t/1")
                    .set("duration", 30),
            ),
        )
        .unwrap();
    let movie_id = movie.id().to_string();
    let trailer_id = movie.entity("trailer").unwrap().unwrap().id().to_string();
    assert!(!movie_id.is_empty());
    assert!(!trailer_id.is_empty());

    // One save persists both.
    movie.save().await.unwrap();
    assert!(
        store
            .contains(&RecordStub::try_new("Trailer", trailer_id.as_str()).unwrap())
            .await
    );

    // Fetch both back through the owner.
    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get(&movie_id)
        .await
        .unwrap();
    let trailer = movie.entity("trailer").unwrap().unwrap();
    assert_eq!(trailer.id(), trailer_id);
    assert_eq!(
        trailer.text("url").unwrap().as_deref(),
        Some("https://example.org/t/1")
    );
    assert_eq!(trailer.int("duration").unwrap(), Some(30));

    // Owner-only fetch leaves the trailer unfetched.
    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get_with(&movie_id, &FieldSelection::only(["title"]))
        .await
        .unwrap();
    assert_eq!(movie.text("title").unwrap().as_deref(), Some("Inception"));
    assert!(movie.presence("trailer").unwrap().is_unknown());

    // Identity-only sub-selection materializes the trailer without its
    // fields.
    let session = root.fork();
    let selection = FieldSelection::fields()
        .field("title", FieldSelection::All)
        .field("trailer", FieldSelection::fields());
    let movie = session
        .collection("Movie")
        .unwrap()
        .get_with(&movie_id, &selection)
        .await
        .unwrap();
    let trailer = movie.entity("trailer").unwrap().unwrap();
    assert_eq!(trailer.id(), trailer_id);
    assert!(trailer.presence("url").unwrap().is_unknown());

    // The trailer can be partially modified through its owner's save.
    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get(&movie_id)
        .await
        .unwrap();
    let trailer = movie.entity("trailer").unwrap().unwrap();
    trailer.set("url", "https://example.org/t/2").unwrap();
    movie.save().await.unwrap();

    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get(&movie_id)
        .await
        .unwrap();
    let trailer = movie.entity("trailer").unwrap().unwrap();
    assert_eq!(
        trailer.text("url").unwrap().as_deref(),
        Some("https://example.org/t/2")
    );
    assert_eq!(trailer.int("duration").unwrap(), Some(30));

    // Replacing the subdocument assigns a brand-new identity.
    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get(&movie_id)
        .await
        .unwrap();
    movie
        .set(
            "trailer",
            Attrs::new()
                .set("url", "https://example.org/t/1")
                .set("duration", 45),
        )
        .unwrap();
    let new_trailer_id = movie.entity("trailer").unwrap().unwrap().id().to_string();
    assert_ne!(new_trailer_id, trailer_id);
    movie.save().await.unwrap();

    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get(&movie_id)
        .await
        .unwrap();
    let trailer = movie.entity("trailer").unwrap().unwrap();
    assert_eq!(trailer.id(), new_trailer_id);
    assert_eq!(trailer.int("duration").unwrap(), Some(45));

    // Deleting the owner removes the embedded record with it.
    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get(&movie_id)
        .await
        .unwrap();
    movie.delete().await.unwrap();
    let session = root.fork();
    assert!(session
        .collection("Movie")
        .unwrap()
        .try_get(&movie_id)
        .await
        .unwrap()
        .is_none());
    assert!(
        !store
            .contains(&RecordStub::try_new("Trailer", new_trailer_id.as_str()).unwrap())
            .await
    );
}

#[tokio::test]
async fn subdocuments_are_not_independently_addressable() {
    let (root, _) = root_session(trailer_registry());

    let err = root.collection("Trailer").unwrap_err();
    assert!(matches!(
        err,
        Error::Schema(docmap_core::error::SchemaError::NotADocument { .. })
    ));
}

#[tokio::test]
async fn finding_documents() {
    let mut registry = Registry::new();
    registry
        .register(
            ModelSchema::document("Movie")
                .field("title", FieldKind::Text)
                .field("genre", FieldKind::Text)
                .field("country", FieldKind::Text)
                .build()
                .unwrap(),
        )
        .unwrap();
    let (root, _) = root_session(registry);

    let session = root.fork();
    let movies = session.collection("Movie").unwrap();
    let mut created = Vec::new();
    for (id, title, genre, country) in [
        ("movie1", "Inception", "action", "USA"),
        ("movie2", "Forrest Gump", "drama", "USA"),
        ("movie3", "Léon", "action", "France"),
    ] {
        let movie = movies
            .create(
                Attrs::new()
                    .set("id", id)
                    .set("title", title)
                    .set("genre", genre)
                    .set("country", country),
            )
            .unwrap();
        movie.save().await.unwrap();
        created.push(movie);
    }

    // Within the creating session, find resolves to the same instances.
    let found = movies.find().fetch().await.unwrap();
    assert_eq!(found.len(), 3);
    for (found, created) in found.iter().zip(&created) {
        assert!(Document::ptr_eq(found, created));
    }

    // A fork materializes fresh instances, in insertion order.
    let ids = |docs: &[Document]| -> Vec<String> {
        docs.iter().map(|d| d.id().to_string()).collect()
    };

    let session = root.fork();
    let movies = session.collection("Movie").unwrap();
    let found = movies.find().fetch().await.unwrap();
    for (found, created) in found.iter().zip(&created) {
        assert!(!Document::ptr_eq(found, created));
    }
    assert_eq!(ids(&found), ["movie1", "movie2", "movie3"]);

    let action = movies.find().filter_eq("genre", "action").fetch().await.unwrap();
    assert_eq!(ids(&action), ["movie1", "movie3"]);

    let french_action = movies
        .find()
        .filter_eq("genre", "action")
        .filter_eq("country", "France")
        .fetch()
        .await
        .unwrap();
    assert_eq!(ids(&french_action), ["movie3"]);

    let adventure = movies
        .find()
        .filter_eq("genre", "adventure")
        .fetch()
        .await
        .unwrap();
    assert!(adventure.is_empty());

    let second = movies.find().skip(1).limit(1).fetch().await.unwrap();
    assert_eq!(ids(&second), ["movie2"]);

    // Shaped results serialize to the partial wire form.
    let session = root.fork();
    let movies = session.collection("Movie").unwrap();
    let titled = movies
        .find()
        .fields(FieldSelection::only(["title"]))
        .fetch()
        .await
        .unwrap();
    let wire: Vec<_> = titled
        .iter()
        .map(|movie| serde_json::to_value(movie.to_record()).unwrap())
        .collect();
    assert_eq!(
        wire,
        vec![
            json!({"_type": "Movie", "_id": "movie1", "title": "Inception"}),
            json!({"_type": "Movie", "_id": "movie2", "title": "Forrest Gump"}),
            json!({"_type": "Movie", "_id": "movie3", "title": "Léon"}),
        ]
    );
}

#[tokio::test]
async fn loading_widens_and_reloading_overwrites() {
    let (root, _) = root_session(movie_only_registry());

    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .create(Attrs::new().set("title", "Inception").set("year", 2010))
        .unwrap();
    let id = movie.id().to_string();
    movie.save().await.unwrap();

    let other = root.fork();
    let cached = other.collection("Movie").unwrap().get(&id).await.unwrap();
    assert!(!Document::ptr_eq(&movie, &cached));

    movie.set("title", "The Matrix").unwrap();
    movie.set("year", 1999).unwrap();
    movie.save().await.unwrap();

    // `load` only widens; everything is already known, so nothing moves.
    cached.load().await.unwrap();
    assert_eq!(cached.text("title").unwrap().as_deref(), Some("Inception"));
    assert_eq!(cached.int("year").unwrap(), Some(2010));

    // `reload` re-reads the full field set unconditionally.
    cached.reload().await.unwrap();
    assert_eq!(cached.text("title").unwrap().as_deref(), Some("The Matrix"));
    assert_eq!(cached.int("year").unwrap(), Some(1999));
}

fn director_registry() -> Registry {
    let mut registry = Registry::new();
    registry
        .register(
            ModelSchema::document("Movie")
                .field("title", FieldKind::Text)
                .field("director", FieldKind::reference("Director"))
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            ModelSchema::document("Director")
                .field("full_name", FieldKind::Text)
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn referenced_documents_have_independent_lifetimes() {
    let (root, _) = root_session(director_registry());

    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .create(
            Attrs::new()
                .set("title", "Inception")
                .set("director", Attrs::new().set("full_name", "Christopher Nolan")),
        )
        .unwrap();
    let movie_id = movie.id().to_string();
    let director = movie.entity("director").unwrap().unwrap();
    let director_id = director.id().to_string();
    director.save().await.unwrap();
    movie.save().await.unwrap();

    // The director is independently addressable.
    let session = root.fork();
    let director = session
        .collection("Director")
        .unwrap()
        .get(&director_id)
        .await
        .unwrap();
    assert_eq!(
        director.text("full_name").unwrap().as_deref(),
        Some("Christopher Nolan")
    );

    // A full fetch of the movie inlines the referenced fields and
    // resolves to the instance the session already holds.
    let movie = session
        .collection("Movie")
        .unwrap()
        .get(&movie_id)
        .await
        .unwrap();
    let inlined = movie.entity("director").unwrap().unwrap();
    assert!(Document::ptr_eq(&director, &inlined));
    assert_eq!(
        inlined.text("full_name").unwrap().as_deref(),
        Some("Christopher Nolan")
    );

    // Owner-only fetch leaves the reference unfetched.
    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get_with(&movie_id, &FieldSelection::only(["title"]))
        .await
        .unwrap();
    assert!(movie.presence("director").unwrap().is_unknown());

    // Identity-only sub-selection yields a stub instance.
    let session = root.fork();
    let selection = FieldSelection::fields()
        .field("title", FieldSelection::All)
        .field("director", FieldSelection::fields());
    let movie = session
        .collection("Movie")
        .unwrap()
        .get_with(&movie_id, &selection)
        .await
        .unwrap();
    let stub = movie.entity("director").unwrap().unwrap();
    assert_eq!(stub.id(), director_id);
    assert!(stub.presence("full_name").unwrap().is_unknown());

    // The reference can be replaced by another saved document.
    let session = root.fork();
    let movies = session.collection("Movie").unwrap();
    let movie = movies.get(&movie_id).await.unwrap();
    let new_director = session
        .collection("Director")
        .unwrap()
        .create(Attrs::new().set("full_name", "C. Nolan"))
        .unwrap();
    let new_director_id = new_director.id().to_string();
    assert_ne!(new_director_id, director_id);
    new_director.save().await.unwrap();
    movie.set("director", new_director).unwrap();
    movie.save().await.unwrap();

    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get(&movie_id)
        .await
        .unwrap();
    let current = movie.entity("director").unwrap().unwrap();
    assert_eq!(current.id(), new_director_id);
    assert_eq!(current.text("full_name").unwrap().as_deref(), Some("C. Nolan"));

    // Deleting the movie leaves both directors fetchable.
    movie.delete().await.unwrap();
    let session = root.fork();
    assert!(session
        .collection("Movie")
        .unwrap()
        .try_get(&movie_id)
        .await
        .unwrap()
        .is_none());
    let directors = session.collection("Director").unwrap();
    assert!(directors.try_get(&new_director_id).await.unwrap().is_some());
    assert!(directors.try_get(&director_id).await.unwrap().is_some());
}

#[tokio::test]
async fn an_unsaved_reference_cascades_through_the_owner_save() {
    let (root, store) = root_session(director_registry());

    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .create(
            Attrs::new()
                .set("title", "Inception")
                .set("director", Attrs::new().set("full_name", "Christopher Nolan")),
        )
        .unwrap();
    let director = movie.entity("director").unwrap().unwrap();

    // Saving the movie writes the still-new referenced document too.
    movie.save().await.unwrap();
    assert!(!director.is_new());
    assert!(store.contains(&director.stub()).await);
}

#[tokio::test]
async fn arrays_of_referenced_documents() {
    let mut registry = Registry::new();
    registry
        .register(
            ModelSchema::document("Movie")
                .field("title", FieldKind::Text)
                .field("actors", FieldKind::reference("Actor").many())
                .build()
                .unwrap(),
        )
        .unwrap();
    registry
        .register(
            ModelSchema::document("Actor")
                .field("full_name", FieldKind::Text)
                .build()
                .unwrap(),
        )
        .unwrap();
    let (root, _) = root_session(registry);

    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .create(
            Attrs::new().set("title", "Inception").set(
                "actors",
                vec![
                    Attrs::new().set("full_name", "Leonardo DiCaprio"),
                    Attrs::new().set("full_name", "Joseph Gordon-Levitt"),
                ],
            ),
        )
        .unwrap();
    let movie_id = movie.id().to_string();
    let actor_ids: Vec<String> = movie
        .entities("actors")
        .unwrap()
        .iter()
        .map(|a| a.id().to_string())
        .collect();
    for actor in movie.entities("actors").unwrap() {
        actor.save().await.unwrap();
    }
    movie.save().await.unwrap();

    // Each actor is addressable through its own collection.
    let session = root.fork();
    let actors = session.collection("Actor").unwrap();
    let first = actors.get(&actor_ids[0]).await.unwrap();
    assert_eq!(
        first.text("full_name").unwrap().as_deref(),
        Some("Leonardo DiCaprio")
    );
    let second = actors.get(&actor_ids[1]).await.unwrap();
    assert_eq!(
        second.text("full_name").unwrap().as_deref(),
        Some("Joseph Gordon-Levitt")
    );

    // Full fetch inlines the array.
    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get(&movie_id)
        .await
        .unwrap();
    let cast = movie.entities("actors").unwrap();
    assert_eq!(cast.len(), 2);
    assert_eq!(cast[0].id(), actor_ids[0]);
    assert_eq!(
        cast[0].text("full_name").unwrap().as_deref(),
        Some("Leonardo DiCaprio")
    );
    assert_eq!(cast[1].id(), actor_ids[1]);
    assert_eq!(
        cast[1].text("full_name").unwrap().as_deref(),
        Some("Joseph Gordon-Levitt")
    );

    // Owner-only fetch yields no actor instances.
    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get_with(&movie_id, &FieldSelection::only(["title"]))
        .await
        .unwrap();
    assert!(movie.entities("actors").unwrap().is_empty());

    // Per-element identity-only selection yields stub instances.
    let session = root.fork();
    let selection = FieldSelection::fields()
        .field("title", FieldSelection::All)
        .field("actors", FieldSelection::each(FieldSelection::fields()));
    let movie = session
        .collection("Movie")
        .unwrap()
        .get_with(&movie_id, &selection)
        .await
        .unwrap();
    let cast = movie.entities("actors").unwrap();
    assert_eq!(cast.len(), 2);
    assert_eq!(cast[0].id(), actor_ids[0]);
    assert!(cast[0].presence("full_name").unwrap().is_unknown());
    assert_eq!(cast[1].id(), actor_ids[1]);
    assert!(cast[1].presence("full_name").unwrap().is_unknown());

    // An element can be modified through the owner and saved directly.
    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get(&movie_id)
        .await
        .unwrap();
    let cast = movie.entities("actors").unwrap();
    cast[0].set("full_name", "L. DiCaprio").unwrap();
    cast[0].save().await.unwrap();

    let session = root.fork();
    let renamed = session
        .collection("Actor")
        .unwrap()
        .get(&actor_ids[0])
        .await
        .unwrap();
    assert_eq!(
        renamed.text("full_name").unwrap().as_deref(),
        Some("L. DiCaprio")
    );

    // Delete the movie and its actors.
    let session = root.fork();
    let movie = session
        .collection("Movie")
        .unwrap()
        .get(&movie_id)
        .await
        .unwrap();
    for actor in movie.entities("actors").unwrap() {
        actor.delete().await.unwrap();
    }
    movie.delete().await.unwrap();

    let session = root.fork();
    assert!(session
        .collection("Movie")
        .unwrap()
        .try_get(&movie_id)
        .await
        .unwrap()
        .is_none());
    let actors = session.collection("Actor").unwrap();
    assert!(actors.try_get(&actor_ids[0]).await.unwrap().is_none());
    assert!(actors.try_get(&actor_ids[1]).await.unwrap().is_none());
}

#[tokio::test]
async fn attr_values_accept_existing_instances_and_lists() {
    let (root, _) = root_session(director_registry());
    let session = root.fork();

    let director = session
        .collection("Director")
        .unwrap()
        .create(Attrs::new().set("full_name", "Christopher Nolan"))
        .unwrap();

    // An existing instance is used as-is, not re-constructed.
    let movie = session
        .collection("Movie")
        .unwrap()
        .create(
            Attrs::new()
                .set("title", "Inception")
                .set("director", AttrValue::from(director.clone())),
        )
        .unwrap();
    let held = movie.entity("director").unwrap().unwrap();
    assert!(Document::ptr_eq(&held, &director));

    // Wrong-model assignment is rejected.
    let other = session
        .collection("Movie")
        .unwrap()
        .create(Attrs::new().set("title", "Tenet"))
        .unwrap();
    let err = other.set("director", movie.clone()).unwrap_err();
    assert!(matches!(err, Error::TypeMismatch { .. }));

    // Explicit scalar values pass through `Value`.
    assert_eq!(
        movie.get("title").unwrap().unwrap().as_scalar(),
        Some(&Value::Text("Inception".to_string()))
    );

    // Presence reporting distinguishes unknown from absent.
    assert!(matches!(
        other.presence("director").unwrap(),
        Presence::Unknown
    ));
}
