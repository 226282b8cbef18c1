use std::fmt::Debug;
use std::pin::pin;

use futures::StreamExt;
use k8s_openapi::serde::de::DeserializeOwned;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Resource};
use tokio::sync::mpsc::Sender;
use tracing::{error, trace};

use crate::Result;

/// Watches a resource and forwards each raw watch event, mapped into zero or
/// more typed events, into a channel. The stream restarts with backoff on
/// watch errors; resyncs re-deliver the full inventory, which the consumers
/// absorb because every handler is idempotent.
pub async fn forward_watch_events<K, E, F>(
    api: Api<K>,
    config: watcher::Config,
    tx: Sender<E>,
    map: F,
) -> Result<()>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + 'static,
    E: Send + 'static,
    F: Fn(watcher::Event<K>) -> Vec<E> + Send + Sync + 'static,
{
    let mut stream = pin!(watcher(api, config).default_backoff());

    while let Some(res) = stream.next().await {
        match res {
            Ok(event) => {
                trace!("received event: {:?}", event);
                for mapped in map(event) {
                    if tx.send(mapped).await.is_err() {
                        error!("event receiver dropped, stopping watch");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                error!(%e, "unexpected error with watch stream")
            }
        }
    }

    Ok(())
}
