#![allow(dead_code)]

use vinyl_core::model::value::{
    expect_integer, expect_optional_integer, expect_optional_text, expect_text,
};
use vinyl_core::{
    Attribute, AttributeError, AttributeKind, Context, Entity, EntityDescriptor, Managed,
    RecordRepository, Stack, Value,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Person {
    pub remote_id: i64,
    pub name: Option<String>,
    pub email: Option<String>,
    pub age: Option<i64>,
}

impl Entity for Person {
    const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
        name: "Person",
        attributes: &[
            Attribute {
                name: "remote_id",
                kind: AttributeKind::Integer,
            },
            Attribute {
                name: "name",
                kind: AttributeKind::Text,
            },
            Attribute {
                name: "email",
                kind: AttributeKind::Text,
            },
            Attribute {
                name: "age",
                kind: AttributeKind::Integer,
            },
        ],
        primary_key: Some("remote_id"),
    };

    fn value(&self, attribute: &str) -> Option<Value> {
        match attribute {
            "remote_id" => Some(Value::Integer(self.remote_id)),
            "name" => Some(self.name.clone().map_or(Value::Null, Value::Text)),
            "email" => Some(self.email.clone().map_or(Value::Null, Value::Text)),
            "age" => Some(self.age.map_or(Value::Null, Value::Integer)),
            _ => None,
        }
    }

    fn set_value(&mut self, attribute: &str, value: Value) -> Result<(), AttributeError> {
        match attribute {
            "remote_id" => self.remote_id = expect_integer(value, "Person", attribute)?,
            "name" => self.name = expect_optional_text(value, "Person", attribute)?,
            "email" => self.email = expect_optional_text(value, "Person", attribute)?,
            "age" => self.age = expect_optional_integer(value, "Person", attribute)?,
            _ => return Err(unknown("Person", attribute)),
        }
        Ok(())
    }
}

/// Text-keyed entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tag {
    pub slug: String,
    pub label: Option<String>,
}

impl Entity for Tag {
    const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
        name: "Tag",
        attributes: &[
            Attribute {
                name: "slug",
                kind: AttributeKind::Text,
            },
            Attribute {
                name: "label",
                kind: AttributeKind::Text,
            },
        ],
        primary_key: Some("slug"),
    };

    fn value(&self, attribute: &str) -> Option<Value> {
        match attribute {
            "slug" => Some(Value::Text(self.slug.clone())),
            "label" => Some(self.label.clone().map_or(Value::Null, Value::Text)),
            _ => None,
        }
    }

    fn set_value(&mut self, attribute: &str, value: Value) -> Result<(), AttributeError> {
        match attribute {
            "slug" => self.slug = expect_text(value, "Tag", attribute)?,
            "label" => self.label = expect_optional_text(value, "Tag", attribute)?,
            _ => return Err(unknown("Tag", attribute)),
        }
        Ok(())
    }
}

/// Entity without a primary key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogLine {
    pub message: String,
}

impl Entity for LogLine {
    const DESCRIPTOR: EntityDescriptor = EntityDescriptor {
        name: "LogLine",
        attributes: &[Attribute {
            name: "message",
            kind: AttributeKind::Text,
        }],
        primary_key: None,
    };

    fn value(&self, attribute: &str) -> Option<Value> {
        match attribute {
            "message" => Some(Value::Text(self.message.clone())),
            _ => None,
        }
    }

    fn set_value(&mut self, attribute: &str, value: Value) -> Result<(), AttributeError> {
        match attribute {
            "message" => self.message = expect_text(value, "LogLine", attribute)?,
            _ => return Err(unknown("LogLine", attribute)),
        }
        Ok(())
    }
}

fn unknown(entity: &'static str, attribute: &str) -> AttributeError {
    AttributeError::UnknownAttribute {
        entity,
        attribute: attribute.to_string(),
    }
}

/// In-memory stack with every test entity registered.
pub fn memory_stack() -> Stack {
    let stack = Stack::open_in_memory().unwrap();
    register_all(&stack);
    stack
}

pub fn register_all(stack: &Stack) {
    stack.register::<Person>().unwrap();
    stack.register::<Tag>().unwrap();
    stack.register::<LogLine>().unwrap();
}

/// Inserts a person in `context` without saving.
pub fn add_person(context: &Context, remote_id: i64, name: &str, age: Option<i64>) -> Managed<Person> {
    let person = context.repository::<Person>().new_object().unwrap();
    person.edit(|person| {
        person.remote_id = remote_id;
        person.name = Some(name.to_string());
        person.age = age;
    });
    person
}

pub fn person_names(people: &[Managed<Person>]) -> Vec<String> {
    people
        .iter()
        .map(|person| person.read(|person| person.name.clone().unwrap_or_default()))
        .collect()
}

pub fn people_with_key(context: &Context, remote_id: i64) -> u64 {
    context
        .repository::<Person>()
        .count(Some(&vinyl_core::Query::eq("remote_id", remote_id)))
        .unwrap()
}
