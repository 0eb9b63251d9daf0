use crate::message::{BeaconMessage, BeaconRequest, Interrupt, RequestStatus};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tokio::sync::Notify;

/// Identifier of a queued consensus-layer request.
pub type RequestId = u64;

#[derive(Debug, Default)]
struct Inner {
    requests: BTreeMap<RequestId, BeaconRequest>,
    next_id: RequestId,
    interrupt: Interrupt,
}

/// Serializes consensus-layer requests into the stage loop.
///
/// Requests stay queued until they are explicitly removed: a request answered
/// with `SYNCING` is re-marked [`RequestStatus::DataWasMissing`] and picked up
/// again on a later cycle, after the download it triggered has completed.
/// Interrupts take priority over queued requests.
#[derive(Debug, Default)]
pub struct RequestList {
    inner: Mutex<Inner>,
    notify: Notify,
}

impl RequestList {
    /// Creates an empty request list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a message, returning the id under which it was stored.
    pub fn push(&self, message: BeaconMessage) -> RequestId {
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.requests.insert(id, BeaconRequest { message, status: RequestStatus::New });
            id
        };
        self.notify.notify_one();
        id
    }

    /// Delivers an interrupt to the waiting stage loop.
    pub fn interrupt(&self, interrupt: Interrupt) {
        self.inner.lock().interrupt = interrupt;
        self.notify.notify_one();
    }

    /// Re-marks the status of a queued request.
    pub fn set_status(&self, id: RequestId, status: RequestStatus) {
        if let Some(request) = self.inner.lock().requests.get_mut(&id) {
            request.status = status;
        }
    }

    /// Removes a request from the queue.
    pub fn remove(&self, id: RequestId) {
        self.inner.lock().requests.remove(&id);
    }

    /// Returns the number of queued requests.
    pub fn len(&self) -> usize {
        self.inner.lock().requests.len()
    }

    /// Returns `true` if no requests are queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().requests.is_empty()
    }

    fn poll(&self) -> Option<(Interrupt, RequestId, Option<BeaconRequest>)> {
        let mut inner = self.inner.lock();
        if inner.interrupt != Interrupt::None {
            let interrupt = std::mem::take(&mut inner.interrupt);
            return Some((interrupt, 0, None))
        }
        if let Some((id, request)) = inner.requests.iter().next() {
            return Some((Interrupt::None, *id, Some(request.clone())))
        }
        None
    }

    /// Blocks until an interrupt or a request is available.
    ///
    /// The returned request is *not* removed from the queue; the caller
    /// removes it once it has decided how to answer.
    pub async fn wait_for_request(&self) -> (Interrupt, RequestId, Option<BeaconRequest>) {
        loop {
            // register for wakeups before checking, so a concurrent push is
            // not missed between the check and the await
            let notified = self.notify.notified();
            if let Some(output) = self.poll() {
                return output
            }
            notified.await;
        }
    }

    /// Like [`Self::wait_for_request`], but gives up after `timeout`,
    /// returning no interrupt and no request.
    pub async fn wait_for_request_with_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> (Interrupt, RequestId, Option<BeaconRequest>) {
        tokio::time::timeout(timeout, self.wait_for_request())
            .await
            .unwrap_or((Interrupt::None, 0, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ForkchoiceState;
    use std::time::Duration;

    fn fork_choice_message() -> BeaconMessage {
        BeaconMessage::ForkChoice(ForkchoiceState::default())
    }

    #[tokio::test]
    async fn requests_are_delivered_in_push_order() {
        let list = RequestList::new();
        let first = list.push(fork_choice_message());
        let second = list.push(fork_choice_message());
        assert!(first < second);

        let (interrupt, id, request) = list.wait_for_request().await;
        assert_eq!(interrupt, Interrupt::None);
        assert_eq!(id, first);
        assert!(request.is_some());

        // the request stays queued until removed
        let (_, id, _) = list.wait_for_request().await;
        assert_eq!(id, first);
        list.remove(first);

        let (_, id, _) = list.wait_for_request().await;
        assert_eq!(id, second);
    }

    #[tokio::test]
    async fn interrupt_takes_priority_and_is_consumed() {
        let list = RequestList::new();
        list.push(fork_choice_message());
        list.interrupt(Interrupt::Synced);

        let (interrupt, _, request) = list.wait_for_request().await;
        assert_eq!(interrupt, Interrupt::Synced);
        assert!(request.is_none());

        // consumed: the next wait sees the queued request
        let (interrupt, _, request) = list.wait_for_request().await;
        assert_eq!(interrupt, Interrupt::None);
        assert!(request.is_some());
    }

    #[tokio::test]
    async fn wait_unblocks_on_push() {
        let list = std::sync::Arc::new(RequestList::new());
        let waiter = {
            let list = list.clone();
            tokio::spawn(async move { list.wait_for_request().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        list.push(fork_choice_message());
        let (_, _, request) = waiter.await.unwrap();
        assert!(request.is_some());
    }

    #[tokio::test]
    async fn wait_with_timeout_returns_empty() {
        let list = RequestList::new();
        let (interrupt, id, request) =
            list.wait_for_request_with_timeout(Duration::from_millis(10)).await;
        assert_eq!(interrupt, Interrupt::None);
        assert_eq!(id, 0);
        assert!(request.is_none());

        list.set_status(42, RequestStatus::DataWasMissing); // unknown id is a no-op
    }
}
