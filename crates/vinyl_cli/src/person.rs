//! Demo `Person` entity keyed by the remote service id.

use vinyl_core::model::value::{expect_integer, expect_optional_integer, expect_optional_text};
use vinyl_core::{Attribute, AttributeError, AttributeKind, Entity, EntityDescriptor, Value};

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
        let entity = Self::DESCRIPTOR.name;
        match attribute {
            "remote_id" => self.remote_id = expect_integer(value, entity, attribute)?,
            "name" => self.name = expect_optional_text(value, entity, attribute)?,
            "email" => self.email = expect_optional_text(value, entity, attribute)?,
            "age" => self.age = expect_optional_integer(value, entity, attribute)?,
            _ => {
                return Err(AttributeError::UnknownAttribute {
                    entity,
                    attribute: attribute.to_string(),
                })
            }
        }
        Ok(())
    }
}
