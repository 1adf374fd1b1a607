//! Per-driver command registry.
//!
//! A registry is built once at driver construction from a list of static
//! descriptor tables and is immutable afterwards. Listing several tables is
//! how shared vocabularies compose: the Lakeshore drivers merge
//! [`crate::command::ieee488::IEEE488_COMMON`] with their own table instead
//! of inheriting it.
//!
//! Construction fails fast on a configuration defect: two descriptors
//! sharing a canonical name within a partition, or one name claimed by both
//! the query and the write partition.

use std::collections::HashMap;

use crate::command::descriptor::{CommandDescriptor, CommandKind};
use crate::error::{ControlError, ControlResult};

/// Immutable name → descriptor map, partitioned by command kind.
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    query: HashMap<&'static str, CommandDescriptor>,
    write: HashMap<&'static str, CommandDescriptor>,
}

impl CommandRegistry {
    /// Builds a registry from one or more static descriptor tables.
    pub fn from_tables(tables: &[&'static [CommandDescriptor]]) -> ControlResult<Self> {
        let mut query: HashMap<&'static str, CommandDescriptor> = HashMap::new();
        let mut write: HashMap<&'static str, CommandDescriptor> = HashMap::new();

        for table in tables {
            for descriptor in *table {
                let (own, other) = match descriptor.kind {
                    CommandKind::Query => (&mut query, &write),
                    CommandKind::Write => (&mut write, &query),
                };
                if other.contains_key(descriptor.name) {
                    return Err(ControlError::Configuration(format!(
                        "Command '{}' is registered as both query and write",
                        descriptor.name
                    )));
                }
                if own.insert(descriptor.name, *descriptor).is_some() {
                    return Err(ControlError::Configuration(format!(
                        "Duplicate command '{}' in registry",
                        descriptor.name
                    )));
                }
            }
        }

        Ok(Self { query, write })
    }

    /// Resolves a canonical command name in either partition.
    pub fn lookup(&self, name: &str) -> Option<&CommandDescriptor> {
        self.query.get(name).or_else(|| self.write.get(name))
    }

    pub fn is_query(&self, name: &str) -> bool {
        self.query.contains_key(name)
    }

    pub fn is_write(&self, name: &str) -> bool {
        self.write.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.query.len() + self.write.len()
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_empty() && self.write.is_empty()
    }

    /// Iterates every registered descriptor, both partitions.
    pub fn iter(&self) -> impl Iterator<Item = &CommandDescriptor> {
        self.query.values().chain(self.write.values())
    }
}
