// Copyright (C) 2024-2026 P2Poolv2 Developers (see AUTHORS)
//
// This file is part of P2Poolv2
//
// P2Poolv2 is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// P2Poolv2 is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// P2Poolv2. If not, see <https://www.gnu.org/licenses/>.

use super::{
    BatchOutcome, LedgerBatch, LedgerCommand, LedgerQuery, LedgerReply, LedgerStore, StoreError,
};
use crate::config::RedisConfig;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Retries when the guard set changes between WATCH and EXEC.
const MAX_GUARD_RETRIES: usize = 3;

/// Ledger kept in Redis, shared with the share writer and stats service.
pub struct RedisLedger {
    client: redis::Client,
    connection: MultiplexedConnection,
}

fn push_command(pipe: &mut redis::Pipeline, command: &LedgerCommand) {
    match command {
        LedgerCommand::HashIncrByFloat {
            key,
            field,
            increment,
        } => {
            pipe.cmd("HINCRBYFLOAT")
                .arg(key)
                .arg(field)
                .arg(increment.normalize().to_string())
                .ignore();
        }
        LedgerCommand::HashSet { key, field, value } => {
            pipe.cmd("HSET").arg(key).arg(field).arg(value).ignore();
        }
        LedgerCommand::HashDel { key, field } => {
            pipe.cmd("HDEL").arg(key).arg(field).ignore();
        }
        LedgerCommand::SetAdd { key, member } => {
            pipe.cmd("SADD").arg(key).arg(member).ignore();
        }
        LedgerCommand::SetMove {
            source,
            destination,
            member,
        } => {
            pipe.cmd("SMOVE")
                .arg(source)
                .arg(destination)
                .arg(member)
                .ignore();
        }
        LedgerCommand::SortedSetAdd { key, score, member } => {
            pipe.cmd("ZADD").arg(key).arg(*score).arg(member).ignore();
        }
        LedgerCommand::Delete { keys } => {
            if !keys.is_empty() {
                pipe.cmd("DEL").arg(keys).ignore();
            }
        }
    }
}

impl RedisLedger {
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.connection_url())
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!("Connected to redis at {}:{}", config.host, config.port);
        Ok(Self { client, connection })
    }

    /// Apply a guarded batch on a dedicated connection, since WATCH state is per connection.
    #[allow(deprecated)]
    async fn apply_guarded(&self, batch: &LedgerBatch) -> Result<BatchOutcome, StoreError> {
        let Some(guard) = &batch.guard else {
            return Err(StoreError::Database("batch has no guard".to_string()));
        };
        let mut connection = self.client.get_async_connection().await?;

        for attempt in 1..=MAX_GUARD_RETRIES {
            redis::cmd("WATCH")
                .arg(&guard.key)
                .query_async::<_, ()>(&mut connection)
                .await?;
            let applied: bool = connection.sismember(&guard.key, &guard.id).await?;
            if applied {
                redis::cmd("UNWATCH")
                    .query_async::<_, ()>(&mut connection)
                    .await?;
                return Ok(BatchOutcome::AlreadyApplied);
            }

            let mut pipe = redis::pipe();
            pipe.atomic();
            for command in &batch.commands {
                push_command(&mut pipe, command);
            }
            pipe.cmd("SADD").arg(&guard.key).arg(&guard.id).ignore();

            let result: Option<()> = pipe.query_async(&mut connection).await?;
            if result.is_some() {
                return Ok(BatchOutcome::Applied);
            }
            warn!(
                "Guard set {} changed during commit of {}, attempt {}",
                guard.key, guard.id, attempt
            );
        }
        Err(StoreError::Conflict(format!(
            "Could not commit batch {} after {} attempts",
            guard.id, MAX_GUARD_RETRIES
        )))
    }
}

#[async_trait]
impl LedgerStore for RedisLedger {
    async fn read_atomic(&self, queries: Vec<LedgerQuery>) -> Result<Vec<LedgerReply>, StoreError> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for query in &queries {
            match query {
                LedgerQuery::HashAll(key) => {
                    pipe.cmd("HGETALL").arg(key);
                }
                LedgerQuery::SetMembers(key) => {
                    pipe.cmd("SMEMBERS").arg(key);
                }
            }
        }

        let mut connection = self.connection.clone();
        let values: Vec<redis::Value> = pipe.query_async(&mut connection).await?;
        if values.len() != queries.len() {
            return Err(StoreError::Corrupt(format!(
                "Expected {} replies, got {}",
                queries.len(),
                values.len()
            )));
        }

        queries
            .iter()
            .zip(values.iter())
            .map(|(query, value)| match query {
                LedgerQuery::HashAll(_) => {
                    let hash: BTreeMap<String, String> = redis::from_redis_value(value)?;
                    Ok(LedgerReply::Hash(hash))
                }
                LedgerQuery::SetMembers(_) => {
                    let members: Vec<String> = redis::from_redis_value(value)?;
                    Ok(LedgerReply::Set(members))
                }
            })
            .collect()
    }

    async fn apply_atomic(&self, batch: &LedgerBatch) -> Result<BatchOutcome, StoreError> {
        if batch.guard.is_some() {
            return self.apply_guarded(batch).await;
        }
        if batch.is_empty() {
            return Ok(BatchOutcome::Applied);
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &batch.commands {
            push_command(&mut pipe, command);
        }
        let mut connection = self.connection.clone();
        pipe.query_async::<_, ()>(&mut connection).await?;
        Ok(BatchOutcome::Applied)
    }

    async fn sorted_set_members(&self, key: &str) -> Result<Vec<(String, f64)>, StoreError> {
        let mut connection = self.connection.clone();
        let members: Vec<(String, f64)> = connection.zrange_withscores(key, 0, -1).await?;
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_commands_are_queued_in_order() {
        let mut pipe = redis::pipe();
        pipe.atomic();
        push_command(
            &mut pipe,
            &LedgerCommand::SetMove {
                source: "coin:blocksPending".to_string(),
                destination: "coin:blocksConfirmed".to_string(),
                member: "b:t:1:w:1".to_string(),
            },
        );
        push_command(
            &mut pipe,
            &LedgerCommand::HashIncrByFloat {
                key: "coin:balances".to_string(),
                field: "t1a".to_string(),
                increment: Decimal::new(-150_000_000, 8),
            },
        );
        push_command(&mut pipe, &LedgerCommand::Delete { keys: vec![] });

        let packed = String::from_utf8(pipe.get_packed_pipeline()).unwrap();
        let smove = packed.find("SMOVE").unwrap();
        let incr = packed.find("HINCRBYFLOAT").unwrap();
        assert!(smove < incr);
        assert!(packed.contains("-1.5"));
        assert!(!packed.contains("DEL\r"));
    }

    #[tokio::test]
    #[ignore] // Needs a local redis server
    async fn test_redis_guarded_batch_real_connection() {
        let config = RedisConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
        };
        let ledger = RedisLedger::connect(&config).await.unwrap();
        let batch = LedgerBatch::guarded(
            crate::store::BatchGuard {
                key: "test:ledgerBatches".to_string(),
                id: format!("test-{}", std::process::id()),
            },
            vec![LedgerCommand::HashSet {
                key: "test:stats".to_string(),
                field: "probe".to_string(),
                value: "1".to_string(),
            }],
        );
        assert_eq!(ledger.apply_atomic(&batch).await.unwrap(), BatchOutcome::Applied);
        assert_eq!(
            ledger.apply_atomic(&batch).await.unwrap(),
            BatchOutcome::AlreadyApplied
        );
    }
}
