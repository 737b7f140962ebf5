use async_trait::async_trait;
use leaderboards_core::{
    AggregateRecord, Attribute, Comparison, Condition, Metadata, Operand, ScoreAssignment,
    ScoreUpdateResult, UpdateRequest,
};
use sqlx::{sqlite::SqliteArguments, Arguments, Row, Sqlite, SqliteConnection};

use super::AggregateStore;
use crate::{
    domain::StoreError,
    infra::db::{parse_optional_json, DBConnection},
};

/// A condition rendered as a SQL boolean expression over the `aggregates` row
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCondition {
    pub sql: String,
    pub binds: Vec<Operand>,
}

impl CompiledCondition {
    pub fn compile(condition: &Condition) -> Self {
        let mut compiled = Self {
            sql: String::new(),
            binds: vec![],
        };
        compiled.push(condition);
        compiled
    }

    fn push(&mut self, condition: &Condition) {
        match condition {
            Condition::Exists(attribute) => {
                self.push_attribute(attribute);
                self.sql.push_str(" IS NOT NULL");
            }
            Condition::NotExists(attribute) => {
                self.push_attribute(attribute);
                self.sql.push_str(" IS NULL");
            }
            Condition::Compare(attribute, comparison, operand) => {
                let types_match = matches!(
                    (attribute, operand),
                    (Attribute::Score, Operand::Number(_))
                        | (Attribute::Metadata(_), Operand::Text(_))
                );
                if !types_match {
                    self.sql.push('0');
                    return;
                }
                self.push_attribute(attribute);
                self.sql.push_str(match comparison {
                    Comparison::Eq => " = ?",
                    Comparison::Lt => " < ?",
                    Comparison::Le => " <= ?",
                    Comparison::Gt => " > ?",
                    Comparison::Ge => " >= ?",
                });
                self.binds.push(operand.clone());
            }
            Condition::And(conditions) => self.push_group(conditions, " AND ", '1'),
            Condition::Or(conditions) => self.push_group(conditions, " OR ", '0'),
        }
    }

    fn push_group(&mut self, conditions: &[Condition], joiner: &str, empty: char) {
        if conditions.is_empty() {
            self.sql.push(empty);
            return;
        }
        self.sql.push('(');
        for (i, condition) in conditions.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(joiner);
            }
            self.push(condition);
        }
        self.sql.push(')');
    }

    fn push_attribute(&mut self, attribute: &Attribute) {
        match attribute {
            Attribute::Score => self.sql.push_str("aggregates.score"),
            Attribute::Metadata(key) => {
                self.sql.push_str("json_extract(aggregates.metadata, ?)");
                self.binds.push(Operand::Text(json_path(key)));
            }
        }
    }
}

fn json_path(key: &str) -> String {
    format!("$.\"{}\"", key.replace('"', "\\\""))
}

fn bind_operand<'q>(args: &mut SqliteArguments<'q>, operand: &Operand) -> Result<(), StoreError> {
    let added = match operand {
        Operand::Number(value) => args.add(*value),
        Operand::Text(value) => args.add(value.clone()),
    };
    added.map_err(|e| StoreError::Db(sqlx::Error::Encode(e)))
}

/// Aggregates persisted in the `aggregates` table.
///
/// Every update is a single `INSERT .. ON CONFLICT DO UPDATE .. WHERE <condition>` (or a
/// plain conditional `UPDATE` when the condition cannot hold for a missing row), so the
/// condition check and the write happen in one statement.
#[derive(Clone)]
pub struct SqliteAggregateStore {
    db_connection: DBConnection,
}

impl SqliteAggregateStore {
    pub fn new(db_connection: DBConnection) -> Self {
        Self { db_connection }
    }

    async fn apply(
        conn: &mut SqliteConnection,
        entry_id: &str,
        leaderboard: &str,
        request: &UpdateRequest,
    ) -> Result<ScoreUpdateResult, StoreError> {
        let (value, score_sql) = match request.score {
            ScoreAssignment::Add(delta) => (delta, "aggregates.score + excluded.score"),
            ScoreAssignment::Set(value) => (value, "excluded.score"),
        };
        let metadata = serde_json::to_string(&request.metadata.clone().unwrap_or_default())?;
        let compiled = request.condition.as_ref().map(CompiledCondition::compile);
        let insert_allowed = request
            .condition
            .as_ref()
            .map_or(true, |condition| condition.evaluate(None));

        let mut args = SqliteArguments::default();
        let query = if insert_allowed {
            args.add(entry_id.to_string())
                .and_then(|_| args.add(leaderboard.to_string()))
                .and_then(|_| args.add(value))
                .and_then(|_| args.add(metadata))
                .map_err(|e| StoreError::Db(sqlx::Error::Encode(e)))?;

            let mut query = format!(
                "INSERT INTO aggregates (entry_id, leaderboard, score, update_counter, metadata)
                 VALUES (?, ?, ?, 1, ?)
                 ON CONFLICT(entry_id, leaderboard) DO UPDATE SET
                    score = {},
                    update_counter = aggregates.update_counter + 1,
                    metadata = json_patch(aggregates.metadata, excluded.metadata),
                    updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')",
                score_sql
            );
            if let Some(compiled) = &compiled {
                query.push_str(" WHERE ");
                query.push_str(&compiled.sql);
                for operand in &compiled.binds {
                    bind_operand(&mut args, operand)?;
                }
            }
            query.push_str(" RETURNING score, update_counter");
            query
        } else {
            // the condition needs an existing row, so never insert
            let score_sql = score_sql.replace("excluded.score", "?");
            args.add(value)
                .and_then(|_| args.add(metadata))
                .and_then(|_| args.add(entry_id.to_string()))
                .and_then(|_| args.add(leaderboard.to_string()))
                .map_err(|e| StoreError::Db(sqlx::Error::Encode(e)))?;

            let mut query = format!(
                "UPDATE aggregates SET
                    score = {},
                    update_counter = aggregates.update_counter + 1,
                    metadata = json_patch(aggregates.metadata, ?),
                    updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
                 WHERE entry_id = ? AND leaderboard = ?",
                score_sql
            );
            if let Some(compiled) = &compiled {
                query.push_str(" AND ");
                query.push_str(&compiled.sql);
                for operand in &compiled.binds {
                    bind_operand(&mut args, operand)?;
                }
            }
            query.push_str(" RETURNING score, update_counter");
            query
        };

        let row = sqlx::query_with::<Sqlite, _>(&query, args)
            .fetch_optional(&mut *conn)
            .await?;

        match row {
            Some(row) => Ok(ScoreUpdateResult {
                new_score: row.try_get("score")?,
                applied: true,
                update_counter: row.try_get::<i64, _>("update_counter")? as u64,
            }),
            None => {
                let stored = Self::fetch(&mut *conn, entry_id, leaderboard).await?;
                Ok(ScoreUpdateResult {
                    new_score: stored.as_ref().map_or(0.0, |r| r.score),
                    applied: false,
                    update_counter: stored.map_or(0, |r| r.update_counter),
                })
            }
        }
    }

    async fn fetch(
        conn: &mut SqliteConnection,
        entry_id: &str,
        leaderboard: &str,
    ) -> Result<Option<AggregateRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT score, update_counter, metadata FROM aggregates
             WHERE entry_id = ? AND leaderboard = ?",
        )
        .bind(entry_id)
        .bind(leaderboard)
        .fetch_optional(conn)
        .await?;

        row.map(|row| -> Result<AggregateRecord, StoreError> {
            let metadata: Option<Metadata> = parse_optional_json(&row, "metadata")?;
            Ok(AggregateRecord {
                score: row.try_get("score")?,
                update_counter: row.try_get::<i64, _>("update_counter")? as u64,
                metadata: metadata.filter(|m| !m.is_empty()),
            })
        })
        .transpose()
    }
}

#[async_trait]
impl AggregateStore for SqliteAggregateStore {
    async fn update(
        &self,
        entry_id: &str,
        leaderboard: &str,
        request: &UpdateRequest,
    ) -> Result<ScoreUpdateResult, StoreError> {
        let mut tx = self.db_connection.write().begin().await?;

        let Some(report_id) = &request.idempotency_key else {
            let result = Self::apply(&mut tx, entry_id, leaderboard, request).await?;
            tx.commit().await?;
            return Ok(result);
        };

        // claim the receipt first so concurrent replays serialize on it
        let claimed = sqlx::query(
            "INSERT INTO report_receipts (entry_id, leaderboard, report_id) VALUES (?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(entry_id)
        .bind(leaderboard)
        .bind(report_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            let row = sqlx::query(
                "SELECT new_score, applied, update_counter FROM report_receipts
                 WHERE entry_id = ? AND leaderboard = ? AND report_id = ?",
            )
            .bind(entry_id)
            .bind(leaderboard)
            .bind(report_id)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;

            return Ok(ScoreUpdateResult {
                new_score: row.try_get("new_score")?,
                applied: row.try_get("applied")?,
                update_counter: row.try_get::<i64, _>("update_counter")? as u64,
            });
        }

        let result = Self::apply(&mut tx, entry_id, leaderboard, request).await?;
        sqlx::query(
            "UPDATE report_receipts SET new_score = ?, applied = ?, update_counter = ?
             WHERE entry_id = ? AND leaderboard = ? AND report_id = ?",
        )
        .bind(result.new_score)
        .bind(result.applied)
        .bind(result.update_counter as i64)
        .bind(entry_id)
        .bind(leaderboard)
        .bind(report_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(result)
    }

    async fn get(
        &self,
        entry_id: &str,
        leaderboard: &str,
    ) -> Result<Option<AggregateRecord>, StoreError> {
        let mut conn = self.db_connection.read().acquire().await?;
        Self::fetch(&mut conn, entry_id, leaderboard).await
    }

    async fn prune_receipts(&self, leaderboard: &str, current: &str) -> Result<u64, StoreError> {
        let prefix = format!("{}::", leaderboard);
        let pruned = sqlx::query(
            "DELETE FROM report_receipts
             WHERE substr(leaderboard, 1, ?) = ? AND leaderboard != ?",
        )
        .bind(prefix.chars().count() as i64)
        .bind(&prefix)
        .bind(current)
        .execute(self.db_connection.write())
        .await?
        .rows_affected();
        Ok(pruned)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(self.db_connection.ping().await?)
    }
}
