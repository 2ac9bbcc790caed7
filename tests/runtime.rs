//! Session behavior against an in-memory oxigraph store.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use oxigraph::model::Term;

use sparql_entity::config::SessionConfig;
use sparql_entity::error::{EntityError, RuntimeError};
use sparql_entity::runtime::{IntegrityViolation, LocalEndpoint, Session, SparqlEndpoint};

use common::*;

fn uri_term(name: &str) -> Term {
    person(name).into()
}

#[test]
fn loads_return_the_same_handle() {
    let store = store();
    seed(&store, r#"p:alice a foaf:Person ; foaf:name "Alice" ."#);
    let mut session = session(&store);

    let first = session.load("Person", &person("alice")).unwrap();
    let second = session.load("Person", &person("alice")).unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(first.single("name"), Some(text("Alice")));
    assert_eq!(first.single("email"), None);
    assert!(first.values("friends").is_empty());
    assert!(!first.is_dirty());
}

#[test]
fn missing_entity_is_a_load_miss() {
    let store = store();
    let mut session = session(&store);
    assert!(matches!(
        session.load("Person", &person("nobody")),
        Err(RuntimeError::LoadMiss { .. })
    ));
}

#[test]
fn commit_cleans_dirty_handles() {
    let store = store();
    seed(&store, r#"p:alice a foaf:Person ; foaf:name "Alice" ."#);
    let mut session = session(&store);

    let alice = session.load("Person", &person("alice")).unwrap();
    session.set(&alice, "name", Some(text("Alicia"))).unwrap();
    assert!(alice.is_dirty());
    assert_eq!(session.dirty_count(), 1);
    assert_eq!(session.changelog().len(), 1);

    session.commit().unwrap();
    assert!(!alice.is_dirty());
    assert_eq!(session.dirty_count(), 0);
    assert!(session.changelog().is_empty());

    let mut fresh = common::session(&store);
    let reloaded = fresh.load("Person", &person("alice")).unwrap();
    assert_eq!(reloaded.single("name"), Some(text("Alicia")));
}

#[test]
fn created_entities_load_back() {
    let store = store();
    let mut session = session(&store);

    let alice = session
        .create(
            "Person",
            &person("alice"),
            &[
                ("name", text("Alice")),
                ("email", iri("mailto:alice@example.org")),
                ("friends", uri_term("bob")),
                ("city", text("Paris")),
            ],
        )
        .unwrap();
    let bob = session
        .create("Person", &person("bob"), &[("name", text("Bob"))])
        .unwrap();
    assert!(alice.is_dirty());
    assert_eq!(session.dirty_count(), 2);

    let all = session.commit_and_load_all("Person").unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|h| h.ptr_eq(&alice)));
    assert!(all.iter().any(|h| h.ptr_eq(&bob)));

    let mut fresh = common::session(&store);
    let loaded = fresh.load("Person", &person("alice")).unwrap();
    assert_eq!(loaded.single("name"), Some(text("Alice")));
    assert_eq!(loaded.single("email"), Some(iri("mailto:alice@example.org")));
    assert_eq!(loaded.single("city"), Some(text("Paris")));
    assert_eq!(loaded.values("friends"), vec![uri_term("bob")]);
}

#[test]
fn selected_loads_apply_the_filter() {
    let store = store();
    seed(
        &store,
        r#"p:alice a foaf:Person ; foaf:name "Alice" .
           p:bob a foaf:Person ; foaf:name "Bob" ."#,
    );
    let mut session = session(&store);
    let selected = session
        .commit_and_load_selected("Person", r#"?name = "Bob""#)
        .unwrap();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].uri(), person("bob"));
}

#[test]
fn complex_property_round_trips() {
    let store = store();
    let mut session = session(&store);
    session
        .create(
            "Person",
            &person("alice"),
            &[("name", text("Alice")), ("city", text("Paris"))],
        )
        .unwrap();
    session.commit().unwrap();

    let mut session = common::session(&store);
    let alice = session.load("Person", &person("alice")).unwrap();
    assert_eq!(alice.single("city"), Some(text("Paris")));
    session.set(&alice, "city", Some(text("Berlin"))).unwrap();
    session.commit().unwrap();

    let mut session = common::session(&store);
    let alice = session.load("Person", &person("alice")).unwrap();
    assert_eq!(alice.single("city"), Some(text("Berlin")));
    session.set(&alice, "city", None).unwrap();
    session.commit().unwrap();

    let mut session = common::session(&store);
    let alice = session.load("Person", &person("alice")).unwrap();
    assert_eq!(alice.single("city"), None);
    session.set(&alice, "city", Some(text("Rome"))).unwrap();
    session.commit().unwrap();

    let mut session = common::session(&store);
    let alice = session.load("Person", &person("alice")).unwrap();
    assert_eq!(alice.single("city"), Some(text("Rome")));
}

#[test]
fn merge_folds_and_redirects() {
    let store = store();
    seed(
        &store,
        r#"p:alice a foaf:Person ; foaf:name "Alice" ; foaf:mbox <mailto:alice@example.org> ; foaf:knows p:carol .
           p:alice2 a foaf:Person ; foaf:name "Alice B." ; foaf:knows p:dave .
           p:carol a foaf:Person ; foaf:name "Carol" ; foaf:knows p:alice2 .
           p:dave a foaf:Person ; foaf:name "Dave" ."#,
    );
    let mut session = session(&store);
    let alice = session.load("Person", &person("alice")).unwrap();
    let duplicate = session.load("Person", &person("alice2")).unwrap();
    let carol = session.load("Person", &person("carol")).unwrap();

    session.merge(&alice, &duplicate).unwrap();
    assert!(duplicate.is_deleted());
    assert_eq!(alice.single("name"), Some(text("Alice B.")));
    assert_eq!(alice.single("email"), Some(iri("mailto:alice@example.org")));
    let friends = alice.values("friends");
    assert_eq!(friends.len(), 2);
    assert!(friends.contains(&uri_term("carol")));
    assert!(friends.contains(&uri_term("dave")));
    assert_eq!(carol.values("friends"), vec![uri_term("alice")]);

    session.commit().unwrap();
    assert!(!session.is_cached(&person("alice2")));

    let mut fresh = common::session(&store);
    let alice = fresh.load("Person", &person("alice")).unwrap();
    assert_eq!(alice.single("name"), Some(text("Alice B.")));
    assert_eq!(alice.values("friends").len(), 2);
    let carol = fresh.load("Person", &person("carol")).unwrap();
    assert_eq!(carol.values("friends"), vec![uri_term("alice")]);
    assert!(matches!(
        fresh.load("Person", &person("alice2")),
        Err(RuntimeError::LoadMiss { .. })
    ));

    let leftovers = LocalEndpoint::from_store(store.clone())
        .select(&format!(
            "SELECT * WHERE {{ {{ {0} ?p ?o }} UNION {{ ?s ?p {0} }} }}",
            person("alice2")
        ))
        .unwrap();
    assert!(leftovers.is_empty());
}

#[test]
fn deleted_handles_reject_every_mutator() {
    let store = store();
    seed(
        &store,
        r#"p:alice a foaf:Person ; foaf:name "Alice" .
           p:bob a foaf:Person ; foaf:name "Bob" ."#,
    );
    let mut session = session(&store);
    let alice = session.load("Person", &person("alice")).unwrap();
    let bob = session.load("Person", &person("bob")).unwrap();

    session.delete(&alice).unwrap();
    let queued = session.changelog().len();

    let deleted = |r: Result<(), RuntimeError>| matches!(r, Err(RuntimeError::MutationOnDeleted { .. }));
    assert!(deleted(session.set(&alice, "name", Some(text("A")))));
    assert!(deleted(session.add(&alice, "friends", uri_term("bob"))));
    assert!(deleted(session.remove(&alice, "friends", &uri_term("bob"))));
    assert!(deleted(session.delete(&alice)));
    assert!(deleted(session.merge(&alice, &bob)));
    assert!(deleted(session.merge(&bob, &alice)));
    assert_eq!(session.changelog().len(), queued);

    session.commit().unwrap();
    assert!(!session.is_cached(&person("alice")));
    assert!(matches!(
        session.load("Person", &person("alice")),
        Err(RuntimeError::LoadMiss { .. })
    ));
}

#[test]
fn empty_commit_sends_no_request() {
    let store = store();
    let updates = Rc::new(RefCell::new(Vec::new()));
    let endpoint = RecordingEndpoint {
        inner: LocalEndpoint::from_store(store.clone()),
        updates: Rc::clone(&updates),
    };
    let mut session = Session::new(SessionConfig::default(), endpoint);
    session.register(person_definition()).unwrap();

    session.commit().unwrap();
    assert!(updates.borrow().is_empty());

    let alice = session
        .create("Person", &person("alice"), &[("name", text("Alice"))])
        .unwrap();
    session
        .set(&alice, "email", Some(iri("mailto:alice@example.org")))
        .unwrap();
    session.commit().unwrap();

    let sent = updates.borrow();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("INSERT DATA"));
    assert!(sent[0].contains("<http://xmlns.com/foaf/0.1/mbox> <mailto:alice@example.org>"));
}

#[test]
fn failed_commit_keeps_the_changelog() {
    let store = store();
    let endpoint = ReadOnlyEndpoint {
        inner: LocalEndpoint::from_store(store.clone()),
    };
    let mut session = Session::new(SessionConfig::default(), endpoint);
    session.register(person_definition()).unwrap();
    let alice = session
        .create("Person", &person("alice"), &[("name", text("Alice"))])
        .unwrap();

    assert!(matches!(session.commit(), Err(RuntimeError::Endpoint { .. })));
    assert_eq!(session.changelog().len(), 1);
    assert_eq!(session.dirty_count(), 1);
    assert!(alice.is_dirty());
}

#[test]
fn references_resolve_through_the_cache() {
    let store = store();
    seed(
        &store,
        r#"p:alice a foaf:Person ; foaf:name "Alice" ; foaf:knows p:bob .
           p:bob a foaf:Person ; foaf:name "Bob" ."#,
    );
    let mut session = session(&store);
    let alice = session.load("Person", &person("alice")).unwrap();
    let friends = session.references(&alice, "friends").unwrap();
    assert_eq!(friends.len(), 1);
    let bob = session.load("Person", &person("bob")).unwrap();
    assert!(bob.ptr_eq(&friends[0]));
    assert!(matches!(
        session.references(&alice, "name"),
        Err(RuntimeError::TypeMismatch { .. })
    ));
}

#[test]
fn registration_fails_on_duplicate_values() {
    let store = store();
    seed(&store, r#"p:x a foaf:Person ; foaf:name "A", "B" ."#);
    let mut session = Session::new(SessionConfig::default(), LocalEndpoint::from_store(store.clone()));
    assert!(matches!(
        session.register(person_definition()),
        Err(EntityError::Runtime(RuntimeError::IntegrityViolation { count: 1, .. }))
    ));
    assert!(session.class("Person").is_err());
}

#[test]
fn revalidation_reports_to_the_listener() {
    let store = store();
    seed(&store, "p:y a foaf:Person .");
    let config = SessionConfig {
        validate_on_register: false,
        ..SessionConfig::default()
    };
    let mut session = Session::new(config, LocalEndpoint::from_store(store.clone()));
    session.register(person_definition()).unwrap();

    let mut seen = Vec::new();
    let mut listener = |v: &IntegrityViolation| seen.push((v.check.clone(), v.offenders.clone()));
    let failed = session.revalidate("Person", &mut listener).unwrap();
    assert_eq!(failed, 1);
    assert_eq!(seen, vec![("required-name".to_string(), vec![uri_term("y")])]);
}

#[test]
fn value_set_under_unconditional_structure_persists() {
    let store = store();
    let mut session = session_with(&store, office_definition());
    session
        .create("Office", &thing("offices/hq"), &[("name", text("HQ"))])
        .unwrap();
    session.commit().unwrap();

    let mut session = session_with(&store, office_definition());
    let hq = session.load("Office", &thing("offices/hq")).unwrap();
    assert_eq!(hq.single("city"), None);
    session.set(&hq, "city", Some(text("Paris"))).unwrap();
    session.commit().unwrap();

    let mut session = session_with(&store, office_definition());
    let hq = session.load("Office", &thing("offices/hq")).unwrap();
    assert_eq!(hq.single("city"), Some(text("Paris")));
    assert_eq!(hq.single("name"), Some(text("HQ")));
}

#[test]
fn block_with_single_and_multi_values_is_created() {
    let store = store();
    let mut session = session_with(&store, shop_definition());
    session
        .create(
            "Shop",
            &thing("shops/corner"),
            &[
                ("name", text("Corner")),
                ("city", text("Paris")),
                ("phones", text("555-0100")),
                ("phones", text("555-0101")),
            ],
        )
        .unwrap();
    session.commit().unwrap();

    let mut session = session_with(&store, shop_definition());
    let shop = session.load("Shop", &thing("shops/corner")).unwrap();
    assert_eq!(shop.single("city"), Some(text("Paris")));
    let phones = shop.values("phones");
    assert_eq!(phones.len(), 2);
    assert!(phones.contains(&text("555-0100")));
    assert!(phones.contains(&text("555-0101")));

    session.add(&shop, "phones", text("555-0102")).unwrap();
    session.commit().unwrap();
    let mut session = session_with(&store, shop_definition());
    let shop = session.load("Shop", &thing("shops/corner")).unwrap();
    assert_eq!(shop.values("phones").len(), 3);
}

#[test]
fn failed_merge_changes_nothing() {
    let store = store();
    seed(
        &store,
        r#"p:alice a foaf:Person ; foaf:name "Alice" ; ex:address [ ex:city "Paris" ] .
           p:alice2 a foaf:Person ; foaf:name "Alice B." ; ex:address [ ex:city "Berlin" ] ."#,
    );
    let mut definition = person_definition();
    definition.overrides.insert(
        "change-city".into(),
        format!("INSERT DATA {{ ${{this}} <{EX}note> ${{reason}} }}"),
    );
    let mut session = session_with(&store, definition);
    let alice = session.load("Person", &person("alice")).unwrap();
    let duplicate = session.load("Person", &person("alice2")).unwrap();

    assert!(matches!(
        session.merge(&alice, &duplicate),
        Err(RuntimeError::MissingValue { .. })
    ));
    assert!(session.changelog().is_empty());
    assert_eq!(session.dirty_count(), 0);
    assert!(!alice.is_dirty());
    assert_eq!(alice.single("name"), Some(text("Alice")));
    assert_eq!(alice.single("city"), Some(text("Paris")));
    assert!(!duplicate.is_deleted());
}
