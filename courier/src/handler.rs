//! Control command handler bridging the socket to the running tasks.

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;
use courier_common::time::epoch_now;
use courier_control::{
    CommandHandler, DispatchCommand, QueueTotals, ReportCommand, Request, RequestCommand,
    Response, ResponseData, StatusReport, SystemCommand, TenantSyncEntry,
};
use courier_dispatch::DispatchProcessor;
use courier_report::ReportSynchronizer;
use courier_store::Store;

/// Routes control requests to the store, dispatcher and synchronizer.
pub struct CourierHandler {
    store: Store,
    dispatch: Arc<DispatchProcessor>,
    report: Arc<ReportSynchronizer>,
    started: Instant,
}

impl CourierHandler {
    #[must_use]
    pub fn new(
        store: Store,
        dispatch: Arc<DispatchProcessor>,
        report: Arc<ReportSynchronizer>,
    ) -> Self {
        Self {
            store,
            dispatch,
            report,
            started: Instant::now(),
        }
    }

    async fn status(&self) -> Response {
        let now = epoch_now();

        let queue = match self.store.queue_counts(now).await {
            Ok(counts) => QueueTotals {
                pending: counts.pending,
                deferred: counts.deferred,
                processed: counts.processed,
            },
            Err(e) => return Response::error(format!("queue counts unavailable: {e}")),
        };

        let tenants = match self.report.sync_status(now).await {
            Ok(status) => status
                .into_iter()
                .map(|tenant| TenantSyncEntry {
                    id: tenant.id,
                    name: tenant.name,
                    active: tenant.active,
                    last_sync_ts: tenant.last_sync_ts,
                    in_dnd: tenant.in_dnd,
                    next_sync_due: tenant.next_sync_due,
                })
                .collect(),
            Err(e) => return Response::error(format!("sync status unavailable: {e}")),
        };

        Response::data(ResponseData::Status(StatusReport {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            dispatch_active: self.dispatch.is_active(),
            queue,
            suspended: self.dispatch.suspended_summary(),
            tenants,
            sync_interval_seconds: self.report.sync_interval_secs(),
        }))
    }
}

#[async_trait]
impl CommandHandler for CourierHandler {
    async fn handle_request(&self, request: Request) -> courier_control::Result<Response> {
        let response = match request.command {
            RequestCommand::System(SystemCommand::Ping) => Response::ok(),
            RequestCommand::System(SystemCommand::Status) => self.status().await,
            RequestCommand::Dispatch(DispatchCommand::Suspend {
                tenant_id,
                batch_code,
            }) => {
                self.dispatch
                    .suspend(tenant_id.as_deref(), batch_code.as_deref());
                Response::ok()
            }
            RequestCommand::Dispatch(DispatchCommand::Activate {
                tenant_id,
                batch_code,
            }) => {
                self.dispatch
                    .activate(tenant_id.as_deref(), batch_code.as_deref());
                Response::ok()
            }
            RequestCommand::Dispatch(DispatchCommand::RunNow) => {
                self.dispatch.wake();
                Response::ok()
            }
            RequestCommand::Report(ReportCommand::RunNow { tenant_id }) => {
                self.report.run_now(tenant_id.as_deref());
                Response::ok()
            }
        };

        Ok(response)
    }
}
