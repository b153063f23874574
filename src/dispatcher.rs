//! Request/reply bookkeeping with bounded retry.
//!
//! Every request with a completion gets a pending entry and a timeout timer.
//! On timeout the identical bytes are queued again until the retry budget is
//! spent; a matching reply, retry exhaustion or channel close removes the
//! entry and runs its completion exactly once on the [`CallbackQueue`].
//!
//! # Locking
//!
//! The pending table is guarded by one mutex. Completions are collected under
//! the lock and dispatched after it is released, so a completion may call
//! back into the dispatcher. Lock order is dispatcher, then output queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::{FlightlinkError, Result};
use crate::events::CallbackQueue;
use crate::protocol::{encode_request, Direction, Inbound, MavlinkEncoder, MavlinkVersion};
use crate::writer::OutputQueue;

/// Default reply timeout per attempt.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// What a reply must carry to resolve a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKey {
    /// MSP reply with this code.
    Msp(u8),
    /// MAVLink frame with this message id.
    Mavlink(u32),
}

/// Receives the reply payload, or `None` on failure.
type ReplyHandler = Box<dyn FnOnce(Option<Bytes>) + Send + 'static>;

struct PendingRequest {
    key: RequestKey,
    message: Bytes,
    retries_remaining: u32,
    timer: Option<AbortHandle>,
    on_reply: ReplyHandler,
}

impl PendingRequest {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

struct State {
    pending: HashMap<u64, PendingRequest>,
    next_id: u64,
    closed: bool,
    mavlink: MavlinkEncoder,
}

struct Inner {
    state: Mutex<State>,
    queue: OutputQueue,
    callbacks: CallbackQueue,
    timeout: Duration,
    runtime: Handle,
}

/// Sends requests and matches replies. Cheaply cloneable.
///
/// Built inside a Tokio runtime; timers run on that runtime, so requests may
/// be sent from any thread afterwards.
#[derive(Clone)]
pub struct RequestDispatcher {
    inner: Arc<Inner>,
}

impl RequestDispatcher {
    pub fn new(queue: OutputQueue, callbacks: CallbackQueue, timeout: Duration) -> Self {
        Self::with_mavlink_encoder(
            queue,
            callbacks,
            timeout,
            MavlinkEncoder::new(MavlinkVersion::V2),
        )
    }

    pub fn with_mavlink_encoder(
        queue: OutputQueue,
        callbacks: CallbackQueue,
        timeout: Duration,
        mavlink: MavlinkEncoder,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    pending: HashMap::new(),
                    next_id: 1,
                    closed: false,
                    mavlink,
                }),
                queue,
                callbacks,
                timeout,
                runtime: Handle::current(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an MSP request without reply tracking.
    pub fn post(&self, code: u8, payload: &[u8]) -> Result<()> {
        let message = encode_request(code, payload)?;
        if self.lock().closed {
            return Err(FlightlinkError::ConnectionClosed);
        }
        self.inner.queue.push(message)
    }

    /// Queue an MSP request and report whether a reply arrived.
    ///
    /// `on_complete` runs exactly once: `true` on a matching reply, `false`
    /// on an error reply, retry exhaustion or close. It is not invoked when
    /// this returns `Err`.
    pub fn send<F>(
        &self,
        code: u8,
        payload: &[u8],
        max_retries: u32,
        on_complete: F,
    ) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let message = encode_request(code, payload)?;
        let mut state = self.lock();
        self.enqueue(
            &mut state,
            RequestKey::Msp(code),
            message,
            max_retries,
            Box::new(move |reply| on_complete(reply.is_some())),
        )
    }

    /// Send an MSP request and wait for the reply payload.
    pub async fn request(&self, code: u8, payload: &[u8], max_retries: u32) -> Result<Bytes> {
        let message = encode_request(code, payload)?;
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            self.enqueue(
                &mut state,
                RequestKey::Msp(code),
                message,
                max_retries,
                Box::new(move |reply| {
                    let _ = tx.send(reply);
                }),
            )?;
        }
        await_reply(rx, code as u32).await
    }

    /// Queue a MAVLink message without reply tracking.
    pub fn post_mavlink(&self, message_id: u32, payload: &[u8]) -> Result<()> {
        let message = {
            let mut state = self.lock();
            if state.closed {
                return Err(FlightlinkError::ConnectionClosed);
            }
            state.mavlink.encode(message_id, payload)?
        };
        self.inner.queue.push(message)
    }

    /// Send a MAVLink message and wait for a frame with `reply_id`.
    pub async fn request_mavlink(
        &self,
        message_id: u32,
        payload: &[u8],
        reply_id: u32,
        max_retries: u32,
    ) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.lock();
            let message = state.mavlink.encode(message_id, payload)?;
            self.enqueue(
                &mut state,
                RequestKey::Mavlink(reply_id),
                message,
                max_retries,
                Box::new(move |reply| {
                    let _ = tx.send(reply);
                }),
            )?;
        }
        await_reply(rx, reply_id).await
    }

    fn enqueue(
        &self,
        state: &mut State,
        key: RequestKey,
        message: Bytes,
        max_retries: u32,
        on_reply: ReplyHandler,
    ) -> Result<()> {
        if state.closed {
            return Err(FlightlinkError::ConnectionClosed);
        }
        let id = state.next_id;
        let timer = self.arm_timer(id);
        if let Err(e) = self.inner.queue.push(message.clone()) {
            timer.abort();
            return Err(e);
        }
        state.next_id += 1;
        state.pending.insert(
            id,
            PendingRequest {
                key,
                message,
                retries_remaining: max_retries,
                timer: Some(timer),
                on_reply,
            },
        );
        tracing::trace!(?key, id, max_retries, "request queued");
        Ok(())
    }

    fn arm_timer(&self, id: u64) -> AbortHandle {
        let inner = Arc::downgrade(&self.inner);
        let timeout = self.inner.timeout;
        self.inner
            .runtime
            .spawn(async move {
                tokio::time::sleep(timeout).await;
                if let Some(inner) = inner.upgrade() {
                    RequestDispatcher { inner }.on_timeout(id);
                }
            })
            .abort_handle()
    }

    fn on_timeout(&self, id: u64) {
        let expired = {
            let mut state = self.lock();
            let Some(request) = state.pending.get_mut(&id) else {
                return;
            };
            if request.retries_remaining > 0 {
                request.retries_remaining -= 1;
                if self.inner.queue.push(request.message.clone()).is_ok() {
                    tracing::debug!(
                        key = ?request.key,
                        retries_remaining = request.retries_remaining,
                        "request timed out, retrying"
                    );
                    request.timer = Some(self.arm_timer(id));
                    return;
                }
            }
            state.pending.remove(&id)
        };

        if let Some(request) = expired {
            tracing::warn!(key = ?request.key, "request failed after retries");
            self.complete(request, None);
        }
    }

    /// Resolve every pending request that `frame` answers.
    ///
    /// Frames travelling toward the device never resolve anything. An MSP
    /// error reply resolves with failure.
    pub fn on_frame(&self, frame: &Inbound) {
        let (key, reply) = match frame {
            Inbound::Msp(f) => match f.direction {
                Direction::Response => (RequestKey::Msp(f.code), Some(f.payload.clone())),
                Direction::Error => (RequestKey::Msp(f.code), None),
                Direction::Request => return,
            },
            Inbound::Mavlink(f) => (RequestKey::Mavlink(f.message_id), Some(f.payload.clone())),
        };

        let resolved = self.take_where(|request| request.key == key);
        if resolved.is_empty() {
            return;
        }
        if reply.is_none() {
            tracing::debug!(?key, "error reply");
        }
        for request in resolved {
            self.complete(request, reply.clone());
        }
    }

    /// Resolve every pending request at once.
    ///
    /// On success each completion receives an empty payload.
    pub fn resolve_all(&self, success: bool) {
        let reply = success.then(Bytes::new);
        for request in self.take_where(|_| true) {
            self.complete(request, reply.clone());
        }
    }

    /// Fail every pending request. Queued messages are kept.
    pub fn fail_pending(&self) {
        let failed = self.take_where(|_| true);
        if !failed.is_empty() {
            tracing::debug!(count = failed.len(), "failing pending requests");
        }
        for request in failed {
            self.complete(request, None);
        }
    }

    /// Fail everything and refuse further sends.
    pub fn close(&self) {
        self.lock().closed = true;
        self.inner.queue.close();
        self.fail_pending();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of requests awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn queue(&self) -> &OutputQueue {
        &self.inner.queue
    }

    fn take_where<P>(&self, predicate: P) -> Vec<PendingRequest>
    where
        P: Fn(&PendingRequest) -> bool,
    {
        let mut state = self.lock();
        let mut ids: Vec<u64> = state
            .pending
            .iter()
            .filter_map(|(&id, request)| predicate(request).then_some(id))
            .collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| state.pending.remove(&id))
            .collect()
    }

    fn complete(&self, mut request: PendingRequest, reply: Option<Bytes>) {
        request.cancel_timer();
        let on_reply = request.on_reply;
        self.inner.callbacks.dispatch(move || on_reply(reply));
    }
}

async fn await_reply(rx: oneshot::Receiver<Option<Bytes>>, code: u32) -> Result<Bytes> {
    match rx.await {
        Ok(Some(payload)) => Ok(payload),
        Ok(None) => Err(FlightlinkError::RequestFailed { code }),
        Err(_) => Err(FlightlinkError::ConnectionClosed),
    }
}

impl std::fmt::Debug for RequestDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("RequestDispatcher")
            .field("pending", &state.pending.len())
            .field("closed", &state.closed)
            .field("timeout", &self.inner.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::spawn_callback_queue;
    use crate::protocol::{message_id, Frame, MavlinkFrame};
    use std::sync::Mutex as StdMutex;

    fn dispatcher() -> RequestDispatcher {
        let (callbacks, _task) = spawn_callback_queue();
        RequestDispatcher::new(OutputQueue::new(), callbacks, DEFAULT_REQUEST_TIMEOUT)
    }

    fn recorder() -> (Arc<StdMutex<Vec<bool>>>, impl FnOnce(bool) + Send + 'static) {
        let results = Arc::new(StdMutex::new(Vec::new()));
        let sink = results.clone();
        (results, move |ok| sink.lock().unwrap().push(ok))
    }

    fn reply(code: u8, payload: &'static [u8]) -> Inbound {
        Inbound::Msp(Frame::new(code, Direction::Response, Bytes::from_static(payload)))
    }

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_sends_n_plus_one() {
        let d = dispatcher();
        let (results, cb) = recorder();

        d.send(101, &[], 2, cb).unwrap();
        assert_eq!(d.queue().len(), 1);

        sleep_ms(1400).await;
        assert_eq!(d.queue().len(), 3);
        assert!(results.lock().unwrap().is_empty());

        sleep_ms(5000).await;
        assert_eq!(d.queue().len(), 3);
        assert_eq!(*results.lock().unwrap(), vec![false]);
        assert_eq!(d.pending_count(), 0);

        // Every attempt is byte-identical.
        let first = d.queue().next_output_message().unwrap();
        assert_eq!(d.queue().next_output_message().unwrap(), first);
        assert_eq!(d.queue().next_output_message().unwrap(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_reply_does_not_complete_twice() {
        let d = dispatcher();
        let (results, cb) = recorder();

        d.send(108, &[], 0, cb).unwrap();
        sleep_ms(600).await;
        assert_eq!(*results.lock().unwrap(), vec![false]);

        d.on_frame(&reply(108, &[1, 2, 3, 4, 5, 6]));
        sleep_ms(10).await;
        assert_eq!(*results.lock().unwrap(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_completes_and_stops_retries() {
        let d = dispatcher();
        let (results, cb) = recorder();

        d.send(101, &[], 3, cb).unwrap();
        sleep_ms(100).await;
        d.on_frame(&reply(101, &[0; 11]));

        sleep_ms(5000).await;
        assert_eq!(*results.lock().unwrap(), vec![true]);
        assert_eq!(d.queue().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_reply_fails_immediately() {
        let d = dispatcher();
        let (results, cb) = recorder();

        d.send(32, &[], 4, cb).unwrap();
        d.on_frame(&Inbound::Msp(Frame::new(32, Direction::Error, Bytes::new())));
        sleep_ms(1).await;

        assert_eq!(*results.lock().unwrap(), vec![false]);
        assert_eq!(d.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outbound_echo_does_not_match() {
        let d = dispatcher();
        let (results, cb) = recorder();

        d.send(1, &[], 0, cb).unwrap();
        d.on_frame(&Inbound::Msp(Frame::new(1, Direction::Request, Bytes::new())));
        sleep_ms(1).await;

        assert!(results.lock().unwrap().is_empty());
        assert_eq!(d.pending_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_code_requests_all_resolved() {
        let d = dispatcher();
        let (first, cb1) = recorder();
        let (second, cb2) = recorder();

        d.send(105, &[], 2, cb1).unwrap();
        d.send(105, &[], 2, cb2).unwrap();
        d.on_frame(&reply(105, &[0xDC, 0x05]));
        sleep_ms(1).await;

        assert_eq!(*first.lock().unwrap(), vec![true]);
        assert_eq!(*second.lock().unwrap(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_codes_are_independent() {
        let d = dispatcher();
        let (attitude, cb1) = recorder();
        let (status, cb2) = recorder();

        d.send(108, &[], 0, cb1).unwrap();
        d.send(101, &[], 5, cb2).unwrap();
        d.on_frame(&reply(101, &[]));

        sleep_ms(600).await;
        assert_eq!(*attitude.lock().unwrap(), vec![false]);
        assert_eq!(*status.lock().unwrap(), vec![true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_returns_payload() {
        let d = dispatcher();

        let responder = d.clone();
        tokio::spawn(async move {
            sleep_ms(100).await;
            responder.on_frame(&reply(1, &[0, 1, 46]));
        });

        let payload = d.request(1, &[], 4).await.unwrap();
        assert_eq!(&payload[..], &[0, 1, 46]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_failure_maps_to_error() {
        let d = dispatcher();
        let err = d.request(2, &[], 1).await.unwrap_err();
        assert!(matches!(err, FlightlinkError::RequestFailed { code: 2 }));
        assert_eq!(d.queue().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_fails_pending_and_rejects_sends() {
        let d = dispatcher();
        let (results, cb) = recorder();

        d.send(101, &[], 10, cb).unwrap();
        d.close();
        sleep_ms(1).await;
        assert_eq!(*results.lock().unwrap(), vec![false]);

        let (late, cb) = recorder();
        assert!(matches!(
            d.send(101, &[], 0, cb),
            Err(FlightlinkError::ConnectionClosed)
        ));
        assert!(d.post(101, &[]).is_err());
        sleep_ms(1000).await;
        assert!(late.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_may_reenter_dispatcher() {
        let d = dispatcher();
        let results = Arc::new(StdMutex::new(Vec::new()));

        let again = d.clone();
        let sink = results.clone();
        d.send(101, &[], 0, move |ok| {
            sink.lock().unwrap().push(ok);
            again.post(102, &[]).unwrap();
        })
        .unwrap();

        d.on_frame(&reply(101, &[]));
        sleep_ms(1).await;

        assert_eq!(*results.lock().unwrap(), vec![true]);
        assert_eq!(d.queue().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_all() {
        let d = dispatcher();

        let first = d.request(1, &[], 0);
        let resolver = d.clone();
        tokio::spawn(async move {
            sleep_ms(10).await;
            resolver.resolve_all(true);
        });

        assert!(first.await.unwrap().is_empty());
        assert_eq!(d.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_too_large_skips_callback() {
        let d = dispatcher();
        let (results, cb) = recorder();

        assert!(matches!(
            d.send(200, &[0u8; 300], 0, cb),
            Err(FlightlinkError::PayloadTooLarge { .. })
        ));
        sleep_ms(1000).await;
        assert!(results.lock().unwrap().is_empty());
        assert!(d.queue().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_send_from_thread_outside_runtime() {
        let d = dispatcher();
        let (results, cb) = recorder();

        let sender = d.clone();
        let sent = std::thread::spawn(move || sender.send(101, &[], 2, cb))
            .join()
            .unwrap();
        assert!(sent.is_ok());
        assert_eq!(d.pending_count(), 1);
        assert_eq!(d.queue().len(), 1);

        d.on_frame(&reply(101, &[]));
        sleep_ms(50).await;
        assert_eq!(*results.lock().unwrap(), vec![true]);
        assert_eq!(d.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mavlink_request_keyed_by_reply_id() {
        let d = dispatcher();

        let responder = d.clone();
        tokio::spawn(async move {
            sleep_ms(50).await;
            responder.on_frame(&Inbound::Mavlink(MavlinkFrame {
                version: MavlinkVersion::V2,
                sequence: 0,
                system_id: 1,
                component_id: 1,
                message_id: message_id::PARAM_VALUE,
                payload: Bytes::from_static(&[0; 25]),
                signed: false,
            }));
        });

        let payload = d
            .request_mavlink(message_id::PARAM_REQUEST_LIST, &[1, 1], message_id::PARAM_VALUE, 2)
            .await
            .unwrap();
        assert_eq!(payload.len(), 25);
    }
}
