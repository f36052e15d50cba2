//! Entity operations: find, insert, update, delete and bulk inserts
//!
//! Every write stamps timestamps first when the record supports it. Records
//! with the [`HasId`](super::entity::HasId) capability get their identifier
//! from the store; records without it are written as-is and no identifier
//! is requested.

use super::adapter::{returned_id, Adapter};
use super::entity::Entity;
use super::error::{DatabaseError, Result};
use super::mapper::ID_COLUMN;
use super::query_builder::copy_statement;
use tokio_util::sync::CancellationToken;

/// Upper bound on bound parameters in one statement
pub const MAX_BIND_PARAMS: usize = 65536;

/// Rows per multi-row INSERT so that `rows * (columns + 1)` stays under
/// [`MAX_BIND_PARAMS`]
pub fn batch_size(columns: usize) -> usize {
    (MAX_BIND_PARAMS / (columns + 1)).max(1)
}

fn stamp<E: Entity>(ent: &mut E) {
    if let Some(ts) = ent.as_timestamps_mut() {
        ts.update_timestamps();
    }
}

fn require_id<E: Entity>(ent: &E) -> Result<i64> {
    ent.as_has_id().map(|v| v.id()).ok_or_else(|| {
        DatabaseError::mapping(format!(
            "cannot get ID of {}",
            std::any::type_name::<E>()
        ))
    })
}

impl Adapter {
    /// Load the row whose id matches `ent`'s identifier into `ent`
    pub async fn find_ent<E: Entity>(&self, cancel: &CancellationToken, ent: &mut E) -> Result<()> {
        let id = require_id(ent)?;
        let mapping = self.mapper().mapping(ent)?;
        let q = self
            .sqrl()
            .select(mapping.table())
            .where_eq(ID_COLUMN, id);
        let row = self
            .run_query_cached(cancel, &q)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DatabaseError::not_found(mapping.table()))?;
        mapping.populate(ent, &row)
    }

    /// Insert `ent`; returns the generated identifier, or 0 when the record
    /// has none. The identifier is also written back into `ent`.
    pub async fn insert_ent<E: Entity>(&self, cancel: &CancellationToken, ent: &mut E) -> Result<i64> {
        stamp(ent);
        let mapping = self.mapper().mapping(ent)?;
        let q = self
            .sqrl()
            .insert(mapping.table())
            .columns(mapping.header())
            .values(mapping.values(ent));

        if !mapping.capabilities().has_id {
            self.run_execute_cached(cancel, &q).await?;
            return Ok(0);
        }

        let rows = self.run_query_cached(cancel, &q.returning(ID_COLUMN)).await?;
        let row = rows
            .first()
            .ok_or_else(|| DatabaseError::mapping("insert returned no identifier"))?;
        let id = returned_id(row)?;
        if let Some(v) = ent.as_has_id_mut() {
            v.set_id(id);
        }
        Ok(id)
    }

    /// Update the row matching `ent`'s identifier.
    ///
    /// With a non-empty `columns` list only those columns are written; the
    /// rest are left out of the statement entirely.
    pub async fn update_ent<E: Entity>(
        &self,
        cancel: &CancellationToken,
        ent: &mut E,
        columns: &[&str],
    ) -> Result<u64> {
        stamp(ent);
        let id = require_id(ent)?;
        let mapping = self.mapper().mapping(ent)?;
        let pairs: Vec<_> = mapping
            .header()
            .iter()
            .cloned()
            .zip(mapping.values(ent))
            .filter(|(column, _)| columns.is_empty() || columns.contains(&column.as_str()))
            .collect();
        if pairs.is_empty() {
            return Err(DatabaseError::mapping(format!(
                "none of {:?} are writable columns of {}",
                columns,
                mapping.table()
            )));
        }

        let q = self
            .sqrl()
            .update(mapping.table())
            .set_map(pairs)
            .where_eq(ID_COLUMN, id);
        self.run_execute_cached(cancel, &q).await
    }

    /// Delete the row matching `ent`'s identifier
    pub async fn delete_ent<E: Entity>(&self, cancel: &CancellationToken, ent: &E) -> Result<u64> {
        let id = require_id(ent)?;
        let mapping = self.mapper().mapping(ent)?;
        let q = self
            .sqrl()
            .delete(mapping.table())
            .where_eq(ID_COLUMN, id);
        self.run_execute_cached(cancel, &q).await
    }

    /// Insert many records with chunked multi-row INSERTs.
    ///
    /// Returns the generated identifiers in input order when the record type
    /// has them, otherwise an empty list. Identifiers are returned, not
    /// written back into the records. On error nothing is returned, even if
    /// earlier chunks were written.
    pub async fn multi_insert_ents<E: Entity>(
        &self,
        cancel: &CancellationToken,
        ents: &mut [E],
    ) -> Result<Vec<i64>> {
        let Some(first) = ents.first() else {
            return Ok(Vec::new());
        };
        let mapping = self.mapper().mapping(first)?;
        for ent in ents.iter_mut() {
            stamp(ent);
        }

        let has_id = mapping.capabilities().has_id;
        let mut ids = Vec::with_capacity(if has_id { ents.len() } else { 0 });
        for chunk in ents.chunks(batch_size(mapping.header().len())) {
            let mut q = self
                .sqrl()
                .insert(mapping.table())
                .columns(mapping.header());
            for ent in chunk {
                q = q.values(mapping.values(ent));
            }

            if has_id {
                let rows = self.run_query(cancel, &q.returning(ID_COLUMN)).await?;
                for row in &rows {
                    ids.push(returned_id(row)?);
                }
            } else {
                self.run_execute(cancel, &q).await?;
            }
        }
        Ok(ids)
    }

    /// Insert many records through the backend's bulk-load channel.
    ///
    /// Runs inside the current transaction, or a new one when the adapter
    /// is bare. Generated identifiers are not reported. Handles without a
    /// bulk-load protocol fail with a configuration error.
    pub async fn copy_insert_ents<E: Entity>(
        &self,
        cancel: &CancellationToken,
        ents: &mut [E],
    ) -> Result<u64> {
        if ents.is_empty() {
            return Ok(0);
        }
        for ent in ents.iter_mut() {
            stamp(ent);
        }

        let ents: &[E] = ents;
        self.tx(|atx| async move {
            let mapping = atx.mapper().mapping(&ents[0])?;
            let sql = copy_statement(mapping.table(), mapping.header());
            let load = async {
                let mut writer = atx
                    .handle()
                    .copy_in(mapping.table(), mapping.header())
                    .await?;
                for ent in ents {
                    writer.write_row(&mapping.values(ent)).await?;
                }
                writer.finish().await
            };
            atx.observe(cancel, &sql, &[], load).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_size_bounds_parameters() {
        assert_eq!(batch_size(3), 16384);
        assert_eq!(batch_size(0), 65536);
        for columns in [1, 7, 15, 100, 1000] {
            let rows = batch_size(columns);
            assert!(rows * (columns + 1) <= MAX_BIND_PARAMS);
        }
        assert_eq!(batch_size(100_000), 1);
    }
}
