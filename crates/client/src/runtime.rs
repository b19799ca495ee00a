//! Drives a client on the current tokio `LocalSet`.

use std::cell::RefCell;
use std::future::{poll_fn, Future};
use std::rc::Rc;
use std::task::Poll;
use std::time::Duration;

use crate::client::WebPubSub;

/// Pumps the client's inbox and timers.
///
/// The client holds a sender to its own inbox, so this never completes on its
/// own. Stop it by dropping the future, for example by racing it against a
/// shutdown signal in `tokio::select!`.
///
/// Listeners run inside this loop while the client is borrowed, so they must
/// not borrow the same `RefCell` themselves.
pub async fn run(client: Rc<RefCell<WebPubSub>>) {
    let sleep = tokio::time::sleep(Duration::from_secs(3600));
    tokio::pin!(sleep);

    poll_fn(|cx| {
        let mut client = client.borrow_mut();
        loop {
            loop {
                match client.poll_input(cx) {
                    Poll::Ready(Some(input)) => client.handle_input(input),
                    Poll::Ready(None) => return Poll::Ready(()),
                    Poll::Pending => break,
                }
            }

            client.handle_timeout();

            if let Some(deadline) = client.poll_timeout() {
                sleep.as_mut().reset(tokio::time::Instant::from_std(deadline));
                if sleep.as_mut().poll(cx).is_ready() {
                    continue;
                }
            }

            client.register_waker(cx.waker());
            return Poll::Pending;
        }
    })
    .await
}
