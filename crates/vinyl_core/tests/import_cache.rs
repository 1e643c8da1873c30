mod common;

use common::{add_person, memory_stack, people_with_key, LogLine, Person, Tag};
use std::panic::{catch_unwind, AssertUnwindSafe};
use vinyl_core::{
    ContextError, ImportError, Query, RecordError, RecordRepository, Value,
};

#[test]
fn current_import_is_scoped_to_perform_import() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    assert_eq!(context.current_import(), None);

    let seen = context
        .perform_import(|session| -> Result<_, ImportError> {
            assert_eq!(context.current_import(), Some(session.id()));
            Ok(session.id())
        })
        .unwrap();

    assert_eq!(context.current_import(), None);
    let next = context
        .perform_import(|session| -> Result<_, ImportError> { Ok(session.id()) })
        .unwrap();
    assert_ne!(seen, next);
}

#[test]
fn import_scope_is_cleared_after_error() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();

    let result = context.perform_import(|session| -> Result<(), ImportError> {
        session.cache_all_objects::<Person>()?;
        Err(ImportError::InvalidBatchSize)
    });

    assert!(matches!(result, Err(ImportError::InvalidBatchSize)));
    assert_eq!(context.current_import(), None);
}

#[test]
fn import_scope_is_cleared_after_panic() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        context.perform_import(|session| -> Result<(), ImportError> {
            session.cache_all_objects::<Person>().unwrap();
            panic!("import work failed");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(context.current_import(), None);

    // The context stays usable and the cache from the aborted import is gone.
    let fetches_before = context.stats().fetch_requests;
    let found = context
        .repository::<Person>()
        .object_with_primary_key(Value::Integer(1), false)
        .unwrap();
    assert!(found.is_none());
    assert_eq!(context.stats().fetch_requests, fetches_before + 1);
}

#[test]
fn cached_lookups_do_not_fetch() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    for remote_id in 1..=3 {
        add_person(&context, remote_id, "seed", None);
    }
    context.save().unwrap();

    context
        .perform_import(|session| -> Result<(), ImportError> {
            assert_eq!(session.cache_all_objects::<Person>()?, 3);
            assert!(session.is_cached::<Person>());
            let fetches = context.stats().fetch_requests;

            for remote_id in 1..=3 {
                let person = session
                    .object_with_primary_key::<Person>(Value::Integer(remote_id), false)?
                    .unwrap();
                assert_eq!(person.read(|person| person.remote_id), remote_id);
            }
            let missing = session.object_with_primary_key::<Person>(Value::Integer(99), false)?;
            assert!(missing.is_none());

            assert_eq!(context.stats().fetch_requests, fetches);
            let stats = session.stats();
            assert_eq!(stats.hits, 3);
            assert_eq!(stats.misses, 1);
            Ok(())
        })
        .unwrap();
}

#[test]
fn repository_calls_inside_an_import_use_the_cache() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();

    context
        .perform_import(|session| -> Result<(), ImportError> {
            session.cache_all_objects::<Person>()?;
            let repo = context.repository::<Person>();
            let fetches = context.stats().fetch_requests;

            let created = repo.object_with_primary_key(Value::Integer(8), true)?.unwrap();
            let again = repo.object_with_primary_key(Value::Integer(8), true)?.unwrap();
            assert!(created.ptr_eq(&again));
            assert_eq!(context.stats().fetch_requests, fetches);
            assert_eq!(session.cached_count::<Person>(), 1);
            assert_eq!(session.stats().created, 1);
            Ok(())
        })
        .unwrap();

    assert_eq!(people_with_key(&context, 8), 1);
}

#[test]
fn incomplete_cache_creates_a_duplicate() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    add_person(&context, 1, "ada", None);
    add_person(&context, 2, "grace", None);
    context.save().unwrap();

    context
        .perform_import(|session| -> Result<(), ImportError> {
            let only_ada = session
                .repository::<Person>()
                .fetch_where(Some(&Query::eq("remote_id", 1)), &[])?;
            assert_eq!(session.cache_objects(&only_ada)?, 1);

            let grace = session
                .object_with_primary_key::<Person>(Value::Integer(2), true)?
                .unwrap();
            assert!(grace.read(|person| person.name.is_none()));
            Ok(())
        })
        .unwrap();

    assert_eq!(people_with_key(&context, 1), 1);
    assert_eq!(people_with_key(&context, 2), 2);
}

#[test]
fn uncached_types_still_hit_the_store() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    let tag = context.repository::<Tag>().new_object().unwrap();
    tag.edit(|tag| tag.slug = "rust".to_string());
    context.save().unwrap();

    context
        .perform_import(|session| -> Result<(), ImportError> {
            session.cache_all_objects::<Person>()?;
            assert!(!session.is_cached::<Tag>());
            let found = session
                .object_with_primary_key::<Tag>(Value::Text("rust".to_string()), false)?
                .unwrap();
            assert!(found.ptr_eq(&tag));
            Ok(())
        })
        .unwrap();
}

#[test]
fn cache_population_is_rejected_on_the_main_context() {
    let stack = memory_stack();
    let main = stack.open_main_context().unwrap();

    let err = main
        .perform_import(|session| session.cache_all_objects::<Person>())
        .unwrap_err();
    assert!(matches!(err, ImportError::MainContext { entity: "Person" }));

    let err = main
        .perform_import(|session| session.cache_objects::<Person>(&[]))
        .unwrap_err();
    assert!(matches!(err, ImportError::MainContext { .. }));
}

#[test]
fn cache_population_requires_a_primary_key() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();

    let err = context
        .perform_import(|session| session.cache_all_objects::<LogLine>())
        .unwrap_err();
    assert!(matches!(
        err,
        ImportError::Record(RecordError::MissingPrimaryKey("LogLine"))
    ));
}

#[test]
fn foreign_objects_cannot_be_cached() {
    let stack = memory_stack();
    let owner = stack.new_background_context().unwrap();
    let person = add_person(&owner, 1, "ada", None);
    owner.save().unwrap();

    let other = stack.new_background_context().unwrap();
    let err = other
        .perform_import(|session| session.cache_objects(&[person.clone()]))
        .unwrap_err();
    match err {
        ImportError::Record(RecordError::Context(ContextError::ForeignObject {
            entity,
            owner: owner_id,
            context,
            ..
        })) => {
            assert_eq!(entity, "Person");
            assert_eq!(owner_id, owner.id());
            assert_eq!(context, other.id());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn nested_import_gets_its_own_cache() {
    let stack = memory_stack();
    let context = stack.new_background_context().unwrap();
    add_person(&context, 1, "ada", None);
    context.save().unwrap();

    context
        .perform_import(|outer| -> Result<(), ImportError> {
            outer.cache_all_objects::<Person>()?;

            context.perform_import(|inner| -> Result<(), ImportError> {
                assert_ne!(inner.id(), outer.id());
                assert!(!inner.is_cached::<Person>());
                assert!(matches!(
                    outer.cache_all_objects::<Person>(),
                    Err(ImportError::SessionNotActive(_))
                ));
                Ok(())
            })?;

            assert_eq!(context.current_import(), Some(outer.id()));
            assert!(outer.is_cached::<Person>());
            assert_eq!(outer.cached_count::<Person>(), 1);
            Ok(())
        })
        .unwrap();
}
