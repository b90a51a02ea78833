use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use super::*;

#[test]
fn emit_reaches_all_subscribers() {
	let emitter: Emitter<u32> = Emitter::new();
	let seen = Arc::new(Mutex::new(Vec::new()));

	let s1 = seen.clone();
	let _d1 = emitter.subscribe(move |v| s1.lock().push(*v));
	let s2 = seen.clone();
	let _d2 = emitter.subscribe(move |v| s2.lock().push(*v * 10));

	emitter.emit(&3);
	assert_eq!(*seen.lock(), vec![3, 30]);
}

#[test]
fn dispose_deregisters() {
	let emitter: Emitter<()> = Emitter::new();
	let count = Arc::new(AtomicUsize::new(0));

	let c = count.clone();
	let d = emitter.subscribe(move |()| {
		c.fetch_add(1, Ordering::SeqCst);
	});
	emitter.emit(&());
	d.dispose();
	emitter.emit(&());

	assert_eq!(count.load(Ordering::SeqCst), 1);
	assert_eq!(emitter.subscriber_count(), 0);
}

#[test]
fn reentrant_subscribe_does_not_affect_inflight_emit() {
	let emitter: Arc<Emitter<()>> = Arc::new(Emitter::new());
	let late_calls = Arc::new(AtomicUsize::new(0));

	let em = emitter.clone();
	let late = late_calls.clone();
	let _d = emitter.subscribe(move |()| {
		let late = late.clone();
		// Late joiner registered mid-dispatch must not see the current event.
		em.subscribe(move |()| {
			late.fetch_add(1, Ordering::SeqCst);
		})
		.forget();
	});

	emitter.emit(&());
	assert_eq!(late_calls.load(Ordering::SeqCst), 0);

	emitter.emit(&());
	assert_eq!(late_calls.load(Ordering::SeqCst), 1);
}
