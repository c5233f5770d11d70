//! Foreign-key dependency resolution
//!
//! Orders tables so every table loads after the tables it references.
//! Self-references are recorded separately and never affect the order: a
//! table's rows load together and constraints are checked at the end of
//! the restore transaction.

use std::collections::{BTreeMap, BTreeSet};

use rusqlite::Connection;

use crate::error::{BackupError, BackupResult};
use crate::schema::TableDescriptor;

/// `from_table` has a foreign key referencing `to_table`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyEdge {
    pub from_table: String,
    pub to_table: String,
}

impl DependencyEdge {
    pub fn new(from_table: impl Into<String>, to_table: impl Into<String>) -> Self {
        Self {
            from_table: from_table.into(),
            to_table: to_table.into(),
        }
    }

    pub fn is_self_reference(&self) -> bool {
        self.from_table == self.to_table
    }
}

/// Resolved load order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOrder {
    /// Referenced tables first
    pub tables: Vec<String>,
    /// Tables with a foreign key to themselves
    pub self_referencing: BTreeSet<String>,
}

impl LoadOrder {
    /// Exact reverse of the load order
    pub fn wipe_order(&self) -> impl Iterator<Item = &str> {
        self.tables.iter().rev().map(String::as_str)
    }
}

pub struct DependencyResolver;

impl DependencyResolver {
    /// Topologically sort `tables` (Kahn's algorithm)
    ///
    /// Among tables that are ready at the same time the smallest name goes
    /// first, so the order is reproducible. Edges touching tables outside
    /// the set are ignored.
    pub fn order(tables: &[String], edges: &[DependencyEdge]) -> BackupResult<LoadOrder> {
        let nodes: BTreeSet<&str> = tables.iter().map(String::as_str).collect();

        let mut self_referencing = BTreeSet::new();
        let mut prerequisites: BTreeMap<&str, BTreeSet<&str>> =
            nodes.iter().map(|t| (*t, BTreeSet::new())).collect();
        let mut dependents: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for edge in edges {
            let (from, to) = (edge.from_table.as_str(), edge.to_table.as_str());
            if !nodes.contains(from) || !nodes.contains(to) {
                continue;
            }
            if edge.is_self_reference() {
                self_referencing.insert(from.to_string());
                continue;
            }
            if let Some(pre) = prerequisites.get_mut(from) {
                pre.insert(to);
            }
            dependents.entry(to).or_default().insert(from);
        }

        let mut remaining: BTreeMap<&str, usize> =
            prerequisites.iter().map(|(t, pre)| (*t, pre.len())).collect();
        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(t, _)| *t)
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(table) = ready.pop_first() {
            remaining.remove(table);
            order.push(table.to_string());

            for dependent in dependents.get(table).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if !remaining.is_empty() {
            return Err(BackupError::CyclicDependency {
                tables: remaining.keys().map(|t| t.to_string()).collect(),
            });
        }

        Ok(LoadOrder {
            tables: order,
            self_referencing,
        })
    }
}

/// Foreign-key edges between `tables`, read from the live schema
pub fn edges_from_database(
    conn: &Connection,
    tables: &[&TableDescriptor],
) -> BackupResult<Vec<DependencyEdge>> {
    let mut stmt = conn.prepare("SELECT DISTINCT \"table\" FROM pragma_foreign_key_list(?1)")?;
    let mut edges = BTreeSet::new();

    for table in tables {
        let targets: Vec<String> = stmt
            .query_map([table.name], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        for target in targets {
            edges.insert(DependencyEdge::new(table.name, target));
        }
    }

    Ok(edges.into_iter().collect())
}
