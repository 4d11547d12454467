// Integration tests for the staged pipeline runtime

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use parallax::pipeline::{chain, BoundedQueue, PinnedStage, PipelineStage, Stage};

#[test]
fn queue_never_exceeds_capacity() {
	let queue = Arc::new(BoundedQueue::<usize>::new(4));
	let pushed = Arc::new(AtomicUsize::new(0));

	let producer = {
		let queue = Arc::clone(&queue);
		let pushed = Arc::clone(&pushed);
		thread::spawn(move || {
			for i in 0..64 {
				queue.push(i);
				pushed.fetch_add(1, Ordering::SeqCst);
			}
		})
	};

	let mut popped = 0;
	let mut max_len = 0;
	while popped < 64 {
		max_len = max_len.max(queue.len());
		queue.pop();
		popped += 1;
		thread::sleep(Duration::from_micros(200));
	}
	producer.join().unwrap();

	assert!(max_len <= 4, "queue length {} exceeded capacity", max_len);
}

#[test]
fn producer_blocks_on_full_queue() {
	let queue = Arc::new(BoundedQueue::<usize>::new(2));
	queue.push(0);
	queue.push(1);
	assert!(!queue.try_push(2), "try_push must fail on a full queue");

	let pushed = Arc::new(AtomicBool::new(false));
	let producer = {
		let queue = Arc::clone(&queue);
		let pushed = Arc::clone(&pushed);
		thread::spawn(move || {
			queue.push(2);
			pushed.store(true, Ordering::SeqCst);
		})
	};

	thread::sleep(Duration::from_millis(60));
	assert!(!pushed.load(Ordering::SeqCst), "producer should be blocked");

	assert_eq!(queue.pop(), 0);
	producer.join().unwrap();
	assert!(pushed.load(Ordering::SeqCst));
	assert_eq!(queue.len(), 2);
}

#[test]
fn barrier_releases_after_exact_task_count() {
	let stage = Arc::new(Stage::new("count", 2, 8, |_| {}));
	stage.set_task_count(3);

	stage.push(0);
	stage.push(1);

	let released = Arc::new(AtomicBool::new(false));
	let waiter = {
		let stage = Arc::clone(&stage);
		let released = Arc::clone(&released);
		thread::spawn(move || {
			stage.wait();
			released.store(true, Ordering::SeqCst);
		})
	};

	// Two of three tasks done: the barrier must still hold.
	thread::sleep(Duration::from_millis(80));
	assert!(!released.load(Ordering::SeqCst), "wait returned after N-1 tasks");

	stage.push(2);
	waiter.join().unwrap();
	assert!(released.load(Ordering::SeqCst));
}

#[test]
fn zero_task_count_releases_immediately() {
	let stage = Stage::new("empty", 3, 4, |_| panic!("no work expected"));
	stage.set_task_count(0);
	stage.wait();
	assert!(stage.is_stopped());
}

#[test]
fn pinned_stage_runs_on_calling_thread() {
	let caller = thread::current().id();
	let observed = Arc::new(Mutex::new(Vec::new()));

	let stage = {
		let observed = Arc::clone(&observed);
		PinnedStage::new("pinned", 4, move |index| {
			observed.lock().unwrap().push((index, thread::current().id()));
		})
	};
	stage.set_task_count(3);
	stage.push(0);
	stage.push(1);
	stage.push(2);
	stage.run();
	stage.wait();

	let observed = observed.lock().unwrap();
	assert_eq!(observed.len(), 3);
	for (_, thread_id) in observed.iter() {
		assert_eq!(*thread_id, caller, "pinned work must stay on the caller thread");
	}
}

#[test]
fn chained_stages_forward_every_task() {
	let n = 50;
	let seen_a = Arc::new(Mutex::new(Vec::new()));
	let seen_b = Arc::new(Mutex::new(Vec::new()));

	let stage_a = {
		let seen_a = Arc::clone(&seen_a);
		Stage::new("a", 4, 8, move |index| {
			seen_a.lock().unwrap().push(index);
		})
	};
	let stage_b = {
		let seen_b = Arc::clone(&seen_b);
		Stage::new("b", 2, 8, move |index| {
			seen_b.lock().unwrap().push(index);
		})
	};

	chain(&stage_a, &stage_b);
	stage_a.set_task_count(n);
	stage_b.set_task_count(n);

	for i in 0..n {
		stage_a.push(i);
	}
	stage_a.wait();
	stage_b.wait();

	let mut a = seen_a.lock().unwrap().clone();
	let mut b = seen_b.lock().unwrap().clone();
	a.sort_unstable();
	b.sort_unstable();
	assert_eq!(a, (0..n).collect::<Vec<_>>());
	assert_eq!(b, (0..n).collect::<Vec<_>>());
}

#[test]
fn panicking_task_still_counts() {
	let stage = Stage::new("flaky", 2, 4, |index| {
		if index == 1 {
			panic!("task 1 exploded");
		}
	});
	stage.set_task_count(3);
	stage.push(0);
	stage.push(1);
	stage.push(2);
	// A hung barrier here would fail the test by timeout.
	stage.wait();
}

#[test]
fn abort_releases_waiters_and_drops_queued_work() {
	let executed = Arc::new(AtomicUsize::new(0));
	let stage = {
		let executed = Arc::clone(&executed);
		Stage::new("slow", 1, 16, move |_| {
			executed.fetch_add(1, Ordering::SeqCst);
			thread::sleep(Duration::from_millis(20));
		})
	};
	stage.set_task_count(100);
	for i in 0..10 {
		stage.push(i);
	}
	thread::sleep(Duration::from_millis(30));
	stage.abort();
	stage.wait();

	assert!(stage.is_stopped());
	assert!(
		executed.load(Ordering::SeqCst) < 10,
		"abort should drop queued work"
	);
}

#[test]
fn pinned_consumer_applies_backpressure() {
	// Producer stage (1 worker, small queues) feeding a slow pinned
	// consumer: in-flight items stay bounded and the stages overlap.
	let n = 8;
	let load_ms = 15u64;
	let work_ms = 30u64;

	let loaded = Arc::new(AtomicUsize::new(0));
	let processed = Arc::new(AtomicUsize::new(0));
	let max_in_flight = Arc::new(AtomicUsize::new(0));

	let load_stage = {
		let loaded = Arc::clone(&loaded);
		Stage::new("load", 1, 2, move |_| {
			thread::sleep(Duration::from_millis(load_ms));
			loaded.fetch_add(1, Ordering::SeqCst);
		})
	};
	let work_stage = {
		let processed = Arc::clone(&processed);
		let loaded = Arc::clone(&loaded);
		let max_in_flight = Arc::clone(&max_in_flight);
		PinnedStage::new("work", 2, move |_| {
			let in_flight = loaded.load(Ordering::SeqCst) - processed.load(Ordering::SeqCst);
			max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
			thread::sleep(Duration::from_millis(work_ms));
			processed.fetch_add(1, Ordering::SeqCst);
		})
	};

	chain(&load_stage, &work_stage);
	load_stage.set_task_count(n);
	work_stage.set_task_count(n);

	let start = Instant::now();
	thread::scope(|scope| {
		scope.spawn(|| {
			for i in 0..n {
				load_stage.push(i);
			}
		});
		work_stage.run();
	});
	load_stage.wait();
	work_stage.wait();
	let elapsed = start.elapsed();

	assert_eq!(processed.load(Ordering::SeqCst), n);
	// Bounded by the consumer queue, its in-hand item, and the single
	// loader holding one finished item while blocked on push.
	assert!(
		max_in_flight.load(Ordering::SeqCst) <= 4,
		"in-flight items grew to {}",
		max_in_flight.load(Ordering::SeqCst)
	);
	// Overlap: strictly faster than the fully serial schedule.
	let serial = Duration::from_millis((load_ms + work_ms) * n as u64);
	assert!(
		elapsed < serial - Duration::from_millis(load_ms),
		"no pipeline overlap observed: {:?}",
		elapsed
	);
}
