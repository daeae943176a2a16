//! Executor seam the land engine depends on (component K/J). `LandEngine`
//! talks to this trait rather than the concrete [`SqlExecutor`] so a test
//! can drive the real worker pool and state machine against an in-memory
//! stand-in instead of a live Postgres pool.

use common::async_trait;
use common::errors::*;

use crate::executor::SqlExecutor;
use crate::value::SqlRecord;

#[async_trait]
pub trait LandExecutor<T: SqlRecord + 'static>: Send + Sync {
    async fn insert_batch(&self, records: &[&T]) -> Vec<Result<()>>;
    async fn update_partial_batch(&self, records: &[(&T, &[&'static str])]) -> Vec<Result<()>>;
    async fn delete_batch(&self, records: &[&T]) -> Vec<Result<()>>;
}

#[async_trait]
impl<T: SqlRecord + Sync + 'static> LandExecutor<T> for SqlExecutor {
    async fn insert_batch(&self, records: &[&T]) -> Vec<Result<()>> {
        SqlExecutor::insert_batch(self, records).await
    }

    async fn update_partial_batch(&self, records: &[(&T, &[&'static str])]) -> Vec<Result<()>> {
        SqlExecutor::update_partial_batch(self, records).await
    }

    async fn delete_batch(&self, records: &[&T]) -> Vec<Result<()>> {
        SqlExecutor::delete_batch(self, records).await
    }
}
