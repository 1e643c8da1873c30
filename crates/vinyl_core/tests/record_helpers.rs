mod common;

use common::{add_person, memory_stack, person_names, people_with_key, LogLine, Person, Tag};
use vinyl_core::{
    AttributeError, ContextError, Query, RecordError, RecordRepository, SortDescriptor, Stack,
    Value,
};

#[test]
fn new_object_is_registered_and_counted() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    let repo = context.repository::<Person>();

    let person = repo.new_object().unwrap();
    assert_eq!(person.context_id(), context.id());
    assert_eq!(repo.count(None).unwrap(), 1);
    assert_eq!(context.registered_objects(), 1);
    assert!(context.has_changes());
}

#[test]
fn find_or_create_is_idempotent() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    let repo = context.repository::<Person>();

    let first = repo
        .object_with_primary_key(Value::Integer(5), true)
        .unwrap()
        .unwrap();
    let second = repo
        .object_with_primary_key(Value::Integer(5), true)
        .unwrap()
        .unwrap();

    assert!(first.ptr_eq(&second));
    assert_eq!(first.read(|person| person.remote_id), 5);
    assert_eq!(people_with_key(&context, 5), 1);
}

#[test]
fn key_values_are_coerced_to_the_declared_kind() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    let repo = context.repository::<Person>();

    let created = repo
        .object_with_primary_key(Value::Text("42".to_string()), true)
        .unwrap()
        .unwrap();
    let found = repo
        .object_with_primary_key(Value::Integer(42), false)
        .unwrap()
        .unwrap();
    assert!(created.ptr_eq(&found));

    let err = repo
        .object_with_primary_key(Value::Real(4.5), true)
        .unwrap_err();
    assert!(matches!(
        err,
        RecordError::Attribute(AttributeError::InvalidKey { .. })
    ));
    let err = repo.object_with_primary_key(Value::Null, true).unwrap_err();
    assert!(matches!(
        err,
        RecordError::Attribute(AttributeError::InvalidKey { .. })
    ));
}

#[test]
fn missing_object_without_create_returns_none() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();

    let found = context
        .repository::<Tag>()
        .object_with_primary_key(Value::Text("rust".to_string()), false)
        .unwrap();
    assert!(found.is_none());
    assert_eq!(context.repository::<Tag>().count(None).unwrap(), 0);
}

#[test]
fn primary_key_lookup_without_primary_key_fails() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    let repo = context.repository::<LogLine>();

    let err = repo
        .object_with_primary_key(Value::Text("anything".to_string()), true)
        .unwrap_err();
    assert!(matches!(err, RecordError::MissingPrimaryKey("LogLine")));
    assert_eq!(repo.count(None).unwrap(), 0);
}

#[test]
fn fetch_and_count_see_unsaved_edits() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    add_person(&context, 1, "ada", Some(36));
    add_person(&context, 2, "grace", Some(45));
    add_person(&context, 3, "linus", Some(28));

    let over_thirty = Query::new("age > ?", [Value::Integer(30)]);
    let repo = context.repository::<Person>();
    let found = repo
        .fetch_where(Some(&over_thirty), &[SortDescriptor::ascending("name")])
        .unwrap();
    assert_eq!(person_names(&found), ["ada", "grace"]);
    assert_eq!(repo.count(Some(&over_thirty)).unwrap(), found.len() as u64);

    let everyone = repo.fetch_where(None, &[]).unwrap();
    assert_eq!(everyone.len(), 3);
    assert_eq!(repo.count(None).unwrap(), 3);
}

#[test]
fn count_matches_fetch_for_several_filters() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    for (remote_id, name) in [(1, "ada"), (2, "alan"), (3, "barbara"), (4, "anita")] {
        add_person(&context, remote_id, name, None);
    }
    let repo = context.repository::<Person>();

    let filters = [
        Query::new("name LIKE ?", [Value::Text("a%".to_string())]),
        Query::any_of("remote_id", [Value::Integer(1), Value::Integer(3)]),
        Query::eq("name", "nobody".to_string()),
        Query::eq("remote_id", 2).or(Query::eq("remote_id", 4)),
        Query::any_of("remote_id", Vec::new()),
    ];
    for filter in &filters {
        let fetched = repo.fetch_where(Some(filter), &[]).unwrap();
        assert_eq!(repo.count(Some(filter)).unwrap(), fetched.len() as u64);
    }
}

#[test]
fn all_sorts_by_name() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    add_person(&context, 1, "b", None);
    add_person(&context, 2, "a", None);
    add_person(&context, 3, "c", None);

    let repo = context.repository::<Person>();
    let ascending = repo.all(&[SortDescriptor::ascending("name")]).unwrap();
    assert_eq!(person_names(&ascending), ["a", "b", "c"]);

    let descending = repo.all(&[SortDescriptor::descending("name")]).unwrap();
    assert_eq!(person_names(&descending), ["c", "b", "a"]);
}

#[test]
fn sort_ties_keep_insertion_order() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    add_person(&context, 10, "first", Some(30));
    add_person(&context, 11, "young", Some(20));
    add_person(&context, 12, "second", Some(30));
    add_person(&context, 13, "third", Some(30));

    let people = context
        .repository::<Person>()
        .all(&[SortDescriptor::descending("age")])
        .unwrap();
    assert_eq!(person_names(&people), ["first", "second", "third", "young"]);
}

#[test]
fn unknown_sort_key_is_rejected() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();

    let err = context
        .repository::<Person>()
        .all(&[SortDescriptor::ascending("height")])
        .unwrap_err();
    match err {
        RecordError::UnknownSortKey { entity, key } => {
            assert_eq!(entity, "Person");
            assert_eq!(key, "height");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn repeated_fetches_share_handles() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    add_person(&context, 7, "ada", None);
    context.save().unwrap();

    let repo = context.repository::<Person>();
    let first = repo.fetch_where(Some(&Query::eq("remote_id", 7)), &[]).unwrap();
    let second = repo.all(&[]).unwrap();
    assert!(first[0].ptr_eq(&second[0]));
}

#[test]
fn unregistered_entity_is_rejected() {
    let stack = Stack::open_in_memory().unwrap();
    stack.register::<Person>().unwrap();
    let context = stack.new_background_context().unwrap();

    let err = context.repository::<Tag>().all(&[]).unwrap_err();
    assert!(matches!(
        err,
        RecordError::Context(ContextError::UnregisteredEntity("Tag"))
    ));
}

#[test]
fn text_keys_find_the_oldest_duplicate() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    let repo = context.repository::<Tag>();

    let older = repo.new_object().unwrap();
    older.edit(|tag| tag.slug = "rust".to_string());
    let newer = repo.new_object().unwrap();
    newer.edit(|tag| tag.slug = "rust".to_string());

    let found = repo
        .object_with_primary_key(Value::Text("rust".to_string()), false)
        .unwrap()
        .unwrap();
    assert!(found.ptr_eq(&older));
}
