use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};

use fieldsync_core::{CollectionKey, Entity, EntityId, EntityType, ScopeId};

use crate::error::StorageError;
use crate::traits::{CursorState, EntityRecord, Storage};

const UPSERT_SQL: &str = "INSERT INTO entities (entity_id, entity_type, scope_id, synced, is_deleted, payload) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT(entity_id) DO UPDATE SET entity_type = excluded.entity_type, scope_id = excluded.scope_id, synced = excluded.synced, is_deleted = excluded.is_deleted, payload = excluded.payload, stored_at = excluded.stored_at";

// Same write, but a locally pending row wins over the server copy.
const MERGE_REMOTE_SQL: &str = "INSERT INTO entities (entity_id, entity_type, scope_id, synced, is_deleted, payload) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT(entity_id) DO UPDATE SET entity_type = excluded.entity_type, scope_id = excluded.scope_id, synced = excluded.synced, is_deleted = excluded.is_deleted, payload = excluded.payload, stored_at = excluded.stored_at
     WHERE entities.synced = 1";

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn scope_key(key: &CollectionKey) -> Vec<u8> {
    key.scope
        .map(|scope| scope.as_bytes().to_vec())
        .unwrap_or_default()
}

fn write_entity(
    tx: &rusqlite::Transaction,
    sql: &str,
    entity: &Entity,
    synced: bool,
) -> Result<usize, StorageError> {
    let payload = entity.to_msgpack()?;
    let scope = entity.scope();
    let changed = tx.execute(
        sql,
        params![
            entity.id().as_bytes().as_slice(),
            entity.entity_type().as_str(),
            scope.as_ref().map(|s| s.as_bytes().as_slice()),
            synced,
            entity.is_deleted(),
            payload,
        ],
    )?;
    Ok(changed)
}

fn decode_payloads<I>(rows: I) -> Result<Vec<Entity>, StorageError>
where
    I: Iterator<Item = rusqlite::Result<Vec<u8>>>,
{
    let mut result = Vec::new();
    for row in rows {
        let payload = row?;
        result.push(Entity::from_msgpack(&payload)?);
    }
    Ok(result)
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }
}

impl Storage for SqliteStorage {
    fn upsert_entities(&mut self, entities: &[Entity], synced: bool) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        for entity in entities {
            write_entity(&tx, UPSERT_SQL, entity, synced)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn merge_remote(&mut self, entities: &[Entity]) -> Result<usize, StorageError> {
        let tx = self.conn.transaction()?;
        let mut merged = 0;
        for entity in entities {
            merged += write_entity(&tx, MERGE_REMOTE_SQL, entity, true)?;
        }
        tx.commit()?;
        Ok(merged)
    }

    fn get_entities(
        &self,
        entity_type: EntityType,
        synced: Option<bool>,
        scope: Option<ScopeId>,
    ) -> Result<Vec<Entity>, StorageError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT payload FROM entities
             WHERE entity_type = ?1 AND (?2 IS NULL OR synced = ?2) AND (?3 IS NULL OR scope_id = ?3)
             ORDER BY seq",
        )?;
        let rows = stmt.query_map(
            params![
                entity_type.as_str(),
                synced,
                scope.as_ref().map(|s| s.as_bytes().as_slice()),
            ],
            |row| row.get::<_, Vec<u8>>(0),
        )?;
        decode_payloads(rows)
    }

    fn get_entity(&self, entity_id: EntityId) -> Result<Option<EntityRecord>, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT payload, synced FROM entities WHERE entity_id = ?1",
                params![entity_id.as_bytes().as_slice()],
                |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;

        match row {
            Some((payload, synced)) => Ok(Some(EntityRecord {
                entity: Entity::from_msgpack(&payload)?,
                synced,
            })),
            None => Ok(None),
        }
    }

    fn get_unsynced(&self) -> Result<Vec<Entity>, StorageError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT payload FROM entities WHERE synced = 0 ORDER BY seq")?;
        let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
        decode_payloads(rows)
    }

    fn count_unsynced(&self) -> Result<u64, StorageError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM entities WHERE synced = 0", [], |row| {
                    row.get(0)
                })?;
        Ok(count as u64)
    }

    fn delete_entities(&mut self, ids: &[EntityId]) -> Result<usize, StorageError> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        for id in ids {
            removed += tx.execute(
                "DELETE FROM entities WHERE entity_id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    fn dependents(&self, entity_id: EntityId) -> Result<Vec<EntityId>, StorageError> {
        let Some(root) = self.get_entity(entity_id)? else {
            return Ok(Vec::new());
        };

        let mut found = Vec::new();
        let mut frontier = vec![(entity_id, root.entity.entity_type())];
        while let Some((owner_id, owner_type)) = frontier.pop() {
            for child_type in owner_type.owned_types() {
                let mut stmt = self.conn.prepare_cached(
                    "SELECT entity_id FROM entities WHERE entity_type = ?1 AND scope_id = ?2 ORDER BY seq",
                )?;
                let rows = stmt
                    .query_map(
                        params![child_type.as_str(), owner_id.as_bytes().as_slice()],
                        |row| row.get::<_, Vec<u8>>(0),
                    )?
                    .collect::<Result<Vec<_>, _>>()?;
                for bytes in rows {
                    let child_id = EntityId::from_bytes(to_array::<16>(bytes, "entity_id")?);
                    found.push(child_id);
                    frontier.push((child_id, *child_type));
                }
            }
        }
        Ok(found)
    }

    fn clear_synced(&mut self, entity_type: EntityType) -> Result<usize, StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM entities WHERE entity_type = ?1 AND synced = 1",
            params![entity_type.as_str()],
        )?;
        Ok(removed)
    }

    fn get_cursor(&self, key: &CollectionKey) -> Result<CursorState, StorageError> {
        let row = self
            .conn
            .query_row(
                "SELECT cursor, reached_end FROM collection_cursors WHERE entity_type = ?1 AND scope_id = ?2",
                params![key.entity_type.as_str(), scope_key(key)],
                |row| Ok((row.get::<_, Option<String>>(0)?, row.get::<_, bool>(1)?)),
            )
            .optional()?;

        Ok(match row {
            Some((cursor, reached_end)) => CursorState {
                cursor,
                reached_end,
            },
            None => CursorState::default(),
        })
    }

    fn set_cursor(&mut self, key: &CollectionKey, state: &CursorState) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO collection_cursors (entity_type, scope_id, cursor, reached_end) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(entity_type, scope_id) DO UPDATE SET cursor = excluded.cursor, reached_end = excluded.reached_end,
                updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
            params![
                key.entity_type.as_str(),
                scope_key(key),
                state.cursor.as_deref(),
                state.reached_end,
            ],
        )?;
        Ok(())
    }

    fn clear_cursors(&mut self, entity_type: EntityType) -> Result<usize, StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM collection_cursors WHERE entity_type = ?1",
            params![entity_type.as_str()],
        )?;
        Ok(removed)
    }
}
