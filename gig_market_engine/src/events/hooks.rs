use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{EscrowUpdatedEvent, EventHandler, EventProducer, Handler, JobUpdatedEvent};

#[derive(Default, Clone)]
pub struct EventProducers {
    pub job_updated_producer: Vec<EventProducer<JobUpdatedEvent>>,
    pub escrow_updated_producer: Vec<EventProducer<EscrowUpdatedEvent>>,
}

pub struct EventHandlers {
    pub on_job_updated: Option<EventHandler<JobUpdatedEvent>>,
    pub on_escrow_updated: Option<EventHandler<EscrowUpdatedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        let on_job_updated = hooks.on_job_updated.map(|f| EventHandler::new(buffer_size, f));
        let on_escrow_updated = hooks.on_escrow_updated.map(|f| EventHandler::new(buffer_size, f));
        Self { on_job_updated, on_escrow_updated }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_job_updated {
            result.job_updated_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_escrow_updated {
            result.escrow_updated_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_job_updated {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
        if let Some(handler) = self.on_escrow_updated {
            tokio::spawn(async move {
                handler.start_handler().await;
            });
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_job_updated: Option<Handler<JobUpdatedEvent>>,
    pub on_escrow_updated: Option<Handler<EscrowUpdatedEvent>>,
}

impl EventHooks {
    pub fn on_job_updated<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(JobUpdatedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_job_updated = Some(Arc::new(f));
        self
    }

    pub fn on_escrow_updated<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(EscrowUpdatedEvent) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
        self.on_escrow_updated = Some(Arc::new(f));
        self
    }
}
