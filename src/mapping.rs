//! Aligns a source column list with a destination column list by name.

use std::collections::HashMap;

use log::debug;

use crate::{
    columns::fold_name,
    error::{CursorError, MappingSide, Result},
    schema::ColumnDescriptor,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Single(usize),
    Ambiguous,
}

/// Bidirectional ordinal alignment between two column lists.
///
/// The alignment is a partial injection: every destination column matches at
/// most one source column and the reverse. Unmatched destination columns read
/// as null; unmatched source columns are not exposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMappingInfo {
    pub source_columns: Vec<ColumnDescriptor>,
    pub destination_columns: Vec<ColumnDescriptor>,
    pub source_to_destination: Vec<Option<usize>>,
    pub destination_to_source: Vec<Option<usize>>,
    /// Destination ordinals that are mapped and need coercion.
    pub non_string_destinations: Vec<usize>,
    /// `non_string_destinations` indexed by destination ordinal.
    needs_coercion: Vec<bool>,
}

impl ColumnMappingInfo {
    /// Joins `source` and `destination` on case-insensitive names.
    ///
    /// Fails when one destination name matches several source columns, or when
    /// several destination columns claim the same source column.
    pub fn resolve(
        source: &[ColumnDescriptor],
        destination: &[ColumnDescriptor],
    ) -> Result<Self> {
        let mut by_name: HashMap<String, Slot> = HashMap::with_capacity(source.len());
        for (ordinal, column) in source.iter().enumerate() {
            by_name
                .entry(fold_name(&column.name))
                .and_modify(|slot| *slot = Slot::Ambiguous)
                .or_insert(Slot::Single(ordinal));
        }

        let mut source_to_destination = vec![None; source.len()];
        let mut destination_to_source = Vec::with_capacity(destination.len());
        let mut non_string_destinations = Vec::new();
        for (dest_ordinal, column) in destination.iter().enumerate() {
            let matched = match by_name.get(&fold_name(&column.name)) {
                None => None,
                Some(Slot::Ambiguous) => {
                    return Err(CursorError::AmbiguousMapping {
                        column: column.name.clone(),
                        side: MappingSide::Source,
                    });
                }
                Some(Slot::Single(src_ordinal)) => {
                    let src_ordinal = *src_ordinal;
                    if source_to_destination[src_ordinal].is_some() {
                        return Err(CursorError::AmbiguousMapping {
                            column: source[src_ordinal].name.clone(),
                            side: MappingSide::Destination,
                        });
                    }
                    source_to_destination[src_ordinal] = Some(dest_ordinal);
                    if !column.datatype.is_string() {
                        non_string_destinations.push(dest_ordinal);
                    }
                    Some(src_ordinal)
                }
            };
            destination_to_source.push(matched);
        }

        let mut needs_coercion = vec![false; destination.len()];
        for &dest in &non_string_destinations {
            needs_coercion[dest] = true;
        }
        let info = ColumnMappingInfo {
            source_columns: source.to_vec(),
            destination_columns: destination.to_vec(),
            source_to_destination,
            destination_to_source,
            non_string_destinations,
            needs_coercion,
        };
        debug!(
            "Mapped {} of {} destination column(s) from {} source column(s)",
            info.mapped_count(),
            destination.len(),
            source.len()
        );
        Ok(info)
    }

    pub fn mapped_count(&self) -> usize {
        self.destination_to_source.iter().flatten().count()
    }

    pub fn source_for(&self, destination: usize) -> Option<usize> {
        self.destination_to_source.get(destination).copied().flatten()
    }

    pub fn destination_for(&self, source: usize) -> Option<usize> {
        self.source_to_destination.get(source).copied().flatten()
    }

    pub fn unmapped_destinations(&self) -> impl Iterator<Item = &ColumnDescriptor> + '_ {
        self.destination_columns
            .iter()
            .zip(&self.destination_to_source)
            .filter(|(_, source)| source.is_none())
            .map(|(column, _)| column)
    }

    pub fn is_non_string(&self, destination: usize) -> bool {
        self.needs_coercion.get(destination).copied().unwrap_or(false)
    }
}
