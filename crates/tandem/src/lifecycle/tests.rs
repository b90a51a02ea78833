use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::*;

#[test]
fn disposable_runs_once() {
	let count = Arc::new(AtomicUsize::new(0));
	let c = count.clone();
	let d = Disposable::new(move || {
		c.fetch_add(1, Ordering::SeqCst);
	});
	d.dispose();
	assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn disposable_runs_on_drop() {
	let count = Arc::new(AtomicUsize::new(0));
	{
		let c = count.clone();
		let _d = Disposable::new(move || {
			c.fetch_add(1, Ordering::SeqCst);
		});
	}
	assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn collection_releases_all_despite_panic() {
	let count = Arc::new(AtomicUsize::new(0));
	let collection = DisposableCollection::new();

	let c = count.clone();
	collection.defer(move || {
		c.fetch_add(1, Ordering::SeqCst);
	});
	collection.defer(|| panic!("release failure"));
	let c = count.clone();
	collection.defer(move || {
		c.fetch_add(1, Ordering::SeqCst);
	});

	collection.dispose();
	assert_eq!(count.load(Ordering::SeqCst), 2);
	assert!(collection.is_disposed());
}

#[test]
fn collection_disposes_late_registrations_immediately() {
	let collection = DisposableCollection::new();
	collection.dispose();

	let count = Arc::new(AtomicUsize::new(0));
	let c = count.clone();
	collection.defer(move || {
		c.fetch_add(1, Ordering::SeqCst);
	});
	assert_eq!(count.load(Ordering::SeqCst), 1);
}

fn counting_debouncer(window: Duration) -> (Debouncer, Arc<AtomicUsize>) {
	let count = Arc::new(AtomicUsize::new(0));
	let c = count.clone();
	let debouncer = Debouncer::new(window, move || {
		let c = c.clone();
		Box::pin(async move {
			c.fetch_add(1, Ordering::SeqCst);
		})
	});
	(debouncer, count)
}

#[tokio::test(start_paused = true)]
async fn debounce_coalesces_triggers() {
	let (debouncer, count) = counting_debouncer(Duration::from_millis(500));

	debouncer.trigger();
	tokio::time::sleep(Duration::from_millis(200)).await;
	debouncer.trigger();
	tokio::time::sleep(Duration::from_millis(200)).await;
	debouncer.trigger();
	assert_eq!(count.load(Ordering::SeqCst), 0);

	tokio::time::sleep(Duration::from_millis(600)).await;
	assert_eq!(count.load(Ordering::SeqCst), 1);
	assert!(!debouncer.is_armed());
}

#[tokio::test(start_paused = true)]
async fn flush_runs_inline_and_disarms() {
	let (debouncer, count) = counting_debouncer(Duration::from_millis(500));

	debouncer.trigger();
	debouncer.flush().await;
	assert_eq!(count.load(Ordering::SeqCst), 1);

	// The original window elapsing must not fire a second time.
	tokio::time::sleep(Duration::from_millis(600)).await;
	assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn flush_without_pending_is_a_noop() {
	let (debouncer, count) = counting_debouncer(Duration::from_millis(500));
	debouncer.flush().await;
	assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn clear_discards_pending() {
	let (debouncer, count) = counting_debouncer(Duration::from_millis(500));

	debouncer.trigger();
	debouncer.clear();
	tokio::time::sleep(Duration::from_millis(600)).await;
	assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_times_out() {
	let err = deadline(Duration::from_millis(10), std::future::pending::<()>()).await.unwrap_err();
	assert!(matches!(err, Error::Timeout(_)));
}

#[tokio::test]
async fn deadline_passes_through_result() {
	let value = deadline(Duration::from_secs(1), async { 7 }).await.unwrap();
	assert_eq!(value, 7);
}
