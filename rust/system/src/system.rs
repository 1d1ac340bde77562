use futures::{Stream, StreamExt};

use super::executor::ComponentExecutor;
use super::scheduler::Scheduler;
use super::types::{Component, ComponentContext, ComponentHandle, ComponentRuntime, ComponentSender};
use super::{Handler, Message};

/// The system is the root of a tree of components. It is responsible for
/// spawning components onto the tokio runtime (or a dedicated OS thread, for
/// components that request `ComponentRuntime::Dedicated`) and for tracking
/// scheduled tasks so that `stop()`/`join()` tear everything down together.
#[derive(Clone, Debug)]
pub struct System {
    scheduler: Scheduler,
}

impl System {
    pub fn new() -> System {
        System {
            scheduler: Scheduler::new(),
        }
    }

    pub fn start_component<C>(&self, component: C) -> ComponentHandle<C>
    where
        C: Component + Send + 'static,
    {
        let (tx, rx) = tokio::sync::mpsc::channel(component.queue_size());
        let sender = ComponentSender::new(tx);
        let cancellation_token = tokio_util::sync::CancellationToken::new();

        let mut executor = ComponentExecutor::new(
            sender.clone(),
            cancellation_token.clone(),
            component,
            self.clone(),
            self.scheduler.clone(),
        );

        let join_handle = match C::runtime() {
            ComponentRuntime::Inherit => {
                let task_future = async move { executor.run(rx).await };
                tokio::spawn(task_future)
            }
            ComponentRuntime::Dedicated => {
                let runtime = tokio::runtime::Handle::current();
                tokio::task::spawn_blocking(move || {
                    runtime.block_on(async move { executor.run(rx).await })
                })
            }
        };

        ComponentHandle::new(
            cancellation_token,
            Some(super::types::ConsumableJoinHandle::from_tokio_task_handle(
                join_handle,
            )),
            sender,
        )
    }

    /// Registers a stream of messages to be forwarded to a component. Used by
    /// `StreamHandler::register_stream` during `on_start`.
    pub(crate) fn register_stream<C, S, M>(&self, stream: S, ctx: &ComponentContext<C>)
    where
        C: Component + Handler<M>,
        S: Stream + Send + Stream<Item = M> + 'static,
        M: Message,
    {
        let sender = ctx.receiver();
        let cancellation_token = ctx.cancellation_token.clone();
        tokio::spawn(async move {
            tokio::pin!(stream);
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => {
                        break;
                    }
                    item = stream.next() => {
                        match item {
                            Some(message) => {
                                if let Err(err) = sender.send(message, None).await {
                                    tracing::error!("Error forwarding stream message: {:?}", err);
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    /// Cancels every component and scheduled task started from this system.
    /// Does not wait for them to finish; call `join()` after for that.
    pub async fn stop(&self) {
        self.scheduler.stop();
    }

    /// Waits for every scheduled task started from this system to finish.
    /// Components must be stopped individually via their `ComponentHandle`.
    pub async fn join(&self) {
        self.scheduler.join().await;
    }
}

impl Default for System {
    fn default() -> Self {
        Self::new()
    }
}

