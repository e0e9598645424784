//! Pool buffers passed between threads through bounded queues.

use pulse_core::alloc::{Buffer, MemoryPool};
use pulse_core::error::PulseError;
use pulse_core::options::PoolOptions;
use pulse_core::queue::BoundedQueue;
use std::thread;
use std::time::Duration;

#[test]
fn producer_blocks_on_pool_until_consumer_releases() {
    const MESSAGES: u32 = 500;

    let pool = MemoryPool::new(PoolOptions::new(4, 2)).unwrap();
    let queue: BoundedQueue<Buffer> = BoundedQueue::new(2).unwrap();
    let (tx, rx) = flume::unbounded();

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..MESSAGES {
                // Blocks whenever both slots are still in flight.
                let mut buf = pool.request().unwrap();
                buf.copy_from_slice(&i.to_le_bytes());
                queue.push(buf.freeze().unwrap());
            }
        });

        s.spawn(|| {
            for _ in 0..MESSAGES {
                let buf = queue.pop();
                let value = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
                tx.send(value).unwrap();
            }
        });
    });
    drop(tx);

    let received: Vec<u32> = rx.iter().collect();
    assert_eq!(received, (0..MESSAGES).collect::<Vec<_>>());
    assert!(pool.is_empty());
}

#[test]
fn fan_out_to_queues_reclaims_after_last_reader() {
    const READERS: usize = 4;

    let pool = MemoryPool::new(PoolOptions::new(16, 1)).unwrap();
    let queues: Vec<BoundedQueue<Buffer>> =
        (0..READERS).map(|_| BoundedQueue::new(1).unwrap()).collect();

    let mut buf = pool.request().unwrap();
    buf.set_len(5).unwrap();
    buf.copy_from_slice(b"hello");
    let publisher = buf.freeze().unwrap();
    for q in &queues {
        q.push(publisher.clone());
    }
    publisher.release().unwrap();
    assert!(pool.is_full());

    thread::scope(|s| {
        for q in &queues {
            s.spawn(move || {
                let buf = q.timed_pop(Duration::from_secs(5)).unwrap();
                assert_eq!(&buf[..], b"hello");
                buf.release().unwrap();
            });
        }
    });

    assert!(pool.is_empty());
    assert_eq!(pool.try_request().map(|b| b.len()), Ok(16));
}

#[test]
fn try_request_fails_fast_while_exhausted() {
    let pool = MemoryPool::new(PoolOptions::new(8, 1)).unwrap();
    let held = pool.try_request().unwrap();

    assert_eq!(
        pool.try_request().unwrap_err(),
        PulseError::Exhausted("memory pool")
    );
    drop(held);
    assert!(pool.try_request().is_ok());
}

#[test]
fn buffers_outlive_the_pool_handle() {
    let pool = MemoryPool::new(PoolOptions::new(8, 1)).unwrap();
    let mut buf = pool.request().unwrap();
    buf.copy_from_slice(b"survivor");
    let shared = buf.freeze().unwrap();
    drop(pool);

    assert_eq!(&shared[..], b"survivor");
    let watcher = shared.pool().clone();
    drop(shared);
    assert_eq!(watcher.n_free(), 1);
}
