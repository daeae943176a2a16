//! Structured concurrency helper used by the land engine to spawn a fixed
//! pool of background workers and join them on shutdown.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use async_std::task::JoinHandle;

pub struct TaskBundle<'a> {
    active: Arc<RwLock<bool>>,
    handles: Vec<JoinHandle<()>>,
    scope: PhantomData<&'a ()>,
}

impl<'a> TaskBundle<'a> {
    pub fn new() -> Self {
        Self {
            active: Arc::new(RwLock::new(true)),
            handles: vec![],
            scope: PhantomData,
        }
    }

    /// Spawns `f` as a member of the bundle. Once the bundle is dropped the
    /// task observes cancellation on its next poll rather than running to
    /// completion in the background unsupervised.
    pub fn add<F: Future<Output = ()> + Send + 'a>(&mut self, f: F) {
        let fboxed: Pin<Box<dyn Future<Output = ()> + Send + 'a>> = Box::pin(f);
        // SAFETY: the bundle's Drop impl flips `active` to false and blocks
        // in `join`/`Drop` until every handle observes it, so the borrowed
        // data outlives the task irrespective of this transmute to 'static.
        let fstatic: Pin<Box<dyn Future<Output = ()> + Send + 'static>> =
            unsafe { std::mem::transmute(fboxed) };
        self.handles.push(async_std::task::spawn(TaskFuture {
            active: self.active.clone(),
            fut: fstatic,
        }));
    }

    pub async fn join(mut self) {
        for handle in self.handles.drain(..) {
            handle.await;
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

impl<'a> Drop for TaskBundle<'a> {
    fn drop(&mut self) {
        *self.active.write().unwrap() = false;
    }
}

struct TaskFuture {
    active: Arc<RwLock<bool>>,
    fut: Pin<Box<dyn Future<Output = ()> + Send + 'static>>,
}

impl Future for TaskFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let active = self.active.clone();
        let guard = active.read().unwrap();
        if !*guard {
            return Poll::Ready(());
        }
        drop(guard);
        self.fut.as_mut().poll(cx)
    }
}
