//! Dispatch queue - 実行可能なジョブの取得
//!
//! 複数の runner（別プロセス・別ホスト）が同じ jobs バケットを共有します。
//! backend 側にロックはなく、取得は etag による compare-and-swap だけで排他します。
//!
//! # 取得アルゴリズム
//! 1. `execution = queued AND exec_after <= now` を `exec_after` 昇順 → 挿入順で検索
//! 2. 候補ごとに `Running` + `runner_id` を書き、読んだ時点の etag を条件に put
//! 3. etag 競合 = 他の runner が先に取った → 次の候補へ
//! 4. 候補が尽きたら再検索
//!
//! 検索結果が空のときだけ `None` を返すので、競合は呼び出し側に漏れません。
//! etag 競合は必ず誰かの claim（か cancel）なので、有限のキューならループは終わります。
//!
//! # offset
//! `offset` は実行中を含むアクティブなジョブの走査位置です。claim 済みのジョブも
//! 数えるので、`next_job(0)`, `next_job(1)`, ... と呼んでも未取得のジョブを飛ばしません。
//! その位置以降に queued が無ければ先頭からやり直します。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::decode;
use crate::domain::job::fields;
use crate::domain::{ExecutionState, Job, RunnerId};
use crate::error::Result;
use crate::ports::{
    Clock, Filter, FindOptions, KvStore, PutCondition, SortKey, StoreError, StoredObject,
};

pub struct DispatchQueue {
    store: Arc<dyn KvStore>,
    bucket: String,
    runner: RunnerId,
    clock: Arc<dyn Clock>,
    batch_size: usize,
}

impl DispatchQueue {
    pub fn new(
        store: Arc<dyn KvStore>,
        bucket: impl Into<String>,
        runner: RunnerId,
        clock: Arc<dyn Clock>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            runner,
            clock,
            batch_size: batch_size.max(1),
        }
    }

    pub fn runner(&self) -> &RunnerId {
        &self.runner
    }

    /// Claim the next eligible job for this runner.
    ///
    /// Returns `Ok(None)` only when nothing is eligible.
    pub async fn next_job(&self, offset: usize) -> Result<Option<Job>> {
        let mut lost: u64 = 0;
        loop {
            let now = self.clock.now();
            let candidates = self.candidates(now, offset).await?;
            if candidates.is_empty() {
                debug!(runner = %self.runner, lost, "no eligible job");
                return Ok(None);
            }

            for object in candidates {
                let mut job: Job = decode(object.value)?;
                job.claim(self.runner.clone(), now);

                let doc = serde_json::to_value(&job)?;
                match self
                    .store
                    .put_object(&self.bucket, &object.key, doc, PutCondition::Matches(object.etag))
                    .await
                {
                    Ok(_) => {
                        info!(job = %job.uuid, runner = %self.runner, target = %job.target, lost, "claimed job");
                        return Ok(Some(job));
                    }
                    Err(StoreError::EtagConflict { .. }) => {
                        lost += 1;
                        debug!(job = %job.uuid, runner = %self.runner, "lost claim race");
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    /// Eligible jobs in dispatch order, without claiming anything.
    pub async fn next_jobs(&self, offset: usize, limit: usize) -> Result<Vec<Job>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.find(eligible(self.clock.now()), offset, limit)
            .await?
            .into_iter()
            .map(|o| decode(o.value))
            .collect()
    }

    /// Queued jobs to try, in dispatch order.
    async fn candidates(&self, now: DateTime<Utc>, offset: usize) -> Result<Vec<StoredObject>> {
        let queued = Filter::eq(fields::EXECUTION, ExecutionState::Queued.as_str());
        let mut position = offset;
        while position > 0 {
            let page = self.find(active(now), position, self.batch_size).await?;
            if page.is_empty() {
                break;
            }
            position += page.len();
            let page: Vec<StoredObject> = page
                .into_iter()
                .filter(|o| queued.matches(&o.value))
                .collect();
            if !page.is_empty() {
                return Ok(page);
            }
        }
        self.find(eligible(now), 0, self.batch_size).await
    }

    async fn find(&self, filter: Filter, offset: usize, limit: usize) -> Result<Vec<StoredObject>> {
        let options = FindOptions::sorted_by([SortKey::asc(fields::EXEC_AFTER), SortKey::insertion()])
            .offset(offset)
            .limit(limit);
        Ok(self.store.find_objects(&self.bucket, &filter, &options).await?)
    }
}

/// Queued and due.
fn eligible(now: DateTime<Utc>) -> Filter {
    Filter::and([
        Filter::eq(fields::EXECUTION, ExecutionState::Queued.as_str()),
        Filter::le(fields::EXEC_AFTER, now.timestamp_millis()),
    ])
}

/// Queued or running, and due.
fn active(now: DateTime<Utc>) -> Filter {
    Filter::and([
        Filter::any_of(
            fields::EXECUTION,
            ExecutionState::active_states().map(|s| Value::from(s.as_str())),
        ),
        Filter::le(fields::EXEC_AFTER, now.timestamp_millis()),
    ])
}
