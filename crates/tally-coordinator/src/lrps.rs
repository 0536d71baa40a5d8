//! Desired and actual LRP writers and accessors.

use tally_core::{codec, schema, Error, Result};

use crate::coordinator::Coordinator;
use crate::fanout;
use crate::models::{ActualLrp, DesiredLrp, LrpInstanceState};

impl Coordinator {
    /// Writes the scheduler's declaration for a process.
    ///
    /// Overwrites any previous declaration for the same `process_guid`.
    pub async fn desire_lrp(&self, lrp: &DesiredLrp) -> Result<()> {
        let key = schema::desired_lrp(&lrp.process_guid)?;
        let value = codec::encode(lrp)?;
        self.store.set(&key, value, None).await?;
        Ok(())
    }

    /// Removes the declaration for a process. Running actuals become
    /// orphans and are stopped by the next convergence pass.
    pub async fn remove_desired_lrp(&self, process_guid: &str) -> Result<()> {
        let key = schema::desired_lrp(process_guid)?;
        self.store.delete(&key).await
    }

    /// Records that an executor has accepted an instance and is bringing
    /// it up. Returns the stored record.
    pub async fn report_actual_lrp_as_starting(
        &self,
        process_guid: &str,
        instance_guid: &str,
        executor_id: &str,
        index: u32,
    ) -> Result<ActualLrp> {
        if executor_id.is_empty() {
            return Err(Error::MissingExecutorId);
        }
        let key = schema::actual_lrp(process_guid, instance_guid)?;
        let actual = ActualLrp {
            process_guid: process_guid.to_string(),
            instance_guid: instance_guid.to_string(),
            executor_id: executor_id.to_string(),
            index,
            state: LrpInstanceState::Starting,
        };
        self.store.set(&key, codec::encode(&actual)?, None).await?;
        Ok(actual)
    }

    /// Returns every desired LRP.
    pub async fn desired_lrps(&self) -> Result<Vec<DesiredLrp>> {
        fanout::hydrate(
            self.store.as_ref(),
            schema::DESIRED_ROOT,
            self.config.fanout_width,
        )
        .await
    }

    /// Returns every desired LRP in the given domain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingDomain`] when `domain` is empty.
    pub async fn desired_lrps_by_domain(&self, domain: &str) -> Result<Vec<DesiredLrp>> {
        if domain.is_empty() {
            return Err(Error::MissingDomain);
        }
        fanout::hydrate_filtered(
            self.store.as_ref(),
            schema::DESIRED_ROOT,
            self.config.fanout_width,
            |lrp: &DesiredLrp| lrp.domain == domain,
        )
        .await
    }

    /// Returns the desired LRP for a process guid.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingProcessGuid`] when the guid is empty; the
    /// store's not-found propagates when no declaration exists.
    pub async fn desired_lrp_by_process_guid(&self, process_guid: &str) -> Result<DesiredLrp> {
        if process_guid.is_empty() {
            return Err(Error::MissingProcessGuid);
        }
        let key = schema::desired_lrp(process_guid)?;
        let node = self.store.get(&key).await?;
        codec::decode(&node.key, &node.value)
    }

    /// Returns every actual LRP across all processes.
    pub async fn actual_lrps(&self) -> Result<Vec<ActualLrp>> {
        fanout::hydrate(
            self.store.as_ref(),
            schema::ACTUAL_ROOT,
            self.config.fanout_width,
        )
        .await
    }
}
