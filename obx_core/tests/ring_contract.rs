//! Integration tests for the ring contract as the engine consumes it:
//! trait objects, whole-transfer policy, frame-aligned discard.

use std::thread;

use obx_core::ring::{ByteRing, RingReader, RingWriter};

const FRAME: usize = 8;
const TRANSFER: usize = 56 * FRAME;

#[test]
fn test_whole_transfers_cross_threads_through_trait_objects() {
    let (producer, consumer) = ByteRing::with_capacity(4 * TRANSFER);
    let mut writer: Box<dyn RingWriter> = Box::new(producer);
    let mut reader: Box<dyn RingReader> = Box::new(consumer);

    let rounds = 32;

    let producer_thread = thread::spawn(move || {
        let mut transfer = vec![0u8; TRANSFER];
        for round in 0..rounds {
            transfer.fill(round as u8);
            // Whole-transfer policy: publish only when it all fits
            while writer.write_space() < TRANSFER {
                thread::yield_now();
            }
            assert_eq!(writer.write(&transfer), TRANSFER);
        }
    });

    let consumer_thread = thread::spawn(move || {
        let mut transfer = vec![0u8; TRANSFER];
        for round in 0..rounds {
            while reader.read_space() < TRANSFER {
                thread::yield_now();
            }
            assert_eq!(reader.read(&mut transfer), TRANSFER);
            assert!(transfer.iter().all(|&b| b == round as u8));
        }
    });

    producer_thread.join().unwrap();
    consumer_thread.join().unwrap();
}

#[test]
fn test_frame_aligned_drain() {
    let (mut producer, mut consumer) = ByteRing::with_capacity(4 * TRANSFER);

    // A backlog that is not frame-aligned
    producer.write(&vec![0xEEu8; TRANSFER + 5]);

    let space = consumer.read_space();
    let drained = consumer.discard(space - space % FRAME);

    assert_eq!(drained, TRANSFER);
    assert_eq!(consumer.read_space(), 5);
}

#[test]
fn test_interleaved_writes_and_discards_keep_order() {
    let (mut producer, mut consumer) = ByteRing::with_capacity(64);

    producer.write(&[1, 2, 3, 4]);
    consumer.discard(2);
    producer.write(&[5, 6]);

    let mut out = [0u8; 4];
    assert_eq!(consumer.read(&mut out), 4);
    assert_eq!(out, [3, 4, 5, 6]);
}
