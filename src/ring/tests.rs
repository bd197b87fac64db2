//! Tests for the ring engine

#[cfg(test)]
mod tests {
    use std::{
        cell::UnsafeCell,
        ptr::NonNull,
        sync::atomic::Ordering,
        thread,
    };

    use crate::error::FrameRingError;
    use crate::ring::*;

    fn fill(addr: u64) -> FillDescriptor {
        FillDescriptor { addr }
    }

    #[test]
    fn test_capacity_must_be_power_of_two() {
        assert!(matches!(
            ring_pair::<FillDescriptor>(0),
            Err(FrameRingError::RingCreation { .. })
        ));
        assert!(matches!(
            ring_pair::<RxDescriptor>(3000),
            Err(FrameRingError::RingCreation { .. })
        ));
        assert!(ring_pair::<TxDescriptor>(1).is_ok());
    }

    #[test]
    fn test_reserve_grants_contiguous_indices() {
        let (mut prod, _cons) = ring_pair::<FillDescriptor>(8).unwrap();

        let (granted, start) = prod.reserve(3);
        assert_eq!((granted, start), (3, 0));
        let (granted, start) = prod.reserve(4);
        assert_eq!((granted, start), (4, 3));
        assert_eq!(prod.reserved(), 7);

        // Only one slot left
        let (granted, start) = prod.reserve(5);
        assert_eq!((granted, start), (1, 7));
        assert_eq!(prod.reserve(1).0, 0);
    }

    #[test]
    fn test_full_ring_grants_nothing() {
        let (mut prod, _cons) = ring_pair::<FillDescriptor>(4).unwrap();
        let (granted, start) = prod.reserve(4);
        for i in 0..granted {
            prod.write(start + i, fill(i as u64 * 4096)).unwrap();
        }
        prod.submit(granted).unwrap();

        assert_eq!(prod.in_flight(), 4);
        assert_eq!(prod.reserve(1).0, 0);
    }

    #[test]
    fn test_batch_is_visible_only_after_submit() {
        let (mut prod, mut cons) = ring_pair::<RxDescriptor>(16).unwrap();

        let (granted, start) = prod.reserve(5);
        for i in 0..granted {
            prod.write(
                start + i,
                RxDescriptor {
                    addr: i as u64 * 4096,
                    len: 60 + i,
                    options: 0,
                },
            )
            .unwrap();
        }
        assert_eq!(cons.peek(16).0, 0);

        prod.submit(granted).unwrap();
        let (available, start) = cons.peek(16);
        assert_eq!(available, 5);
        for i in 0..available {
            let desc = cons.read(start + i).unwrap();
            assert_eq!(desc.addr, i as u64 * 4096);
            assert_eq!(desc.len, 60 + i);
        }
        cons.release(available).unwrap();
        assert_eq!(cons.in_flight(), 0);
    }

    #[test]
    fn test_writes_outside_reservation_are_rejected() {
        let (mut prod, _cons) = ring_pair::<FillDescriptor>(8).unwrap();
        assert!(prod.write(0, fill(0)).is_err());

        let (granted, start) = prod.reserve(2);
        assert!(prod.write(start + granted, fill(0)).is_err());
        assert!(prod.write(start + 1, fill(0)).is_ok());
        assert!(matches!(
            prod.submit(3),
            Err(FrameRingError::ProtocolDesync { .. })
        ));
    }

    #[test]
    fn test_reads_and_releases_outside_peek_are_rejected() {
        let (mut prod, mut cons) = ring_pair::<CompletionDescriptor>(8).unwrap();
        let (granted, start) = prod.reserve(2);
        for i in 0..granted {
            prod.write(start + i, CompletionDescriptor { addr: i as u64 })
                .unwrap();
        }
        prod.submit(granted).unwrap();

        assert!(cons.read(0).is_err());
        let (available, start) = cons.peek(1);
        assert_eq!(available, 1);
        assert!(cons.read(start).is_ok());
        assert!(cons.read(start + 1).is_err());
        assert!(matches!(
            cons.release(2),
            Err(FrameRingError::ProtocolDesync { .. })
        ));
    }

    #[test]
    fn test_partial_submit_keeps_remaining_reservation() {
        let (mut prod, mut cons) = ring_pair::<FillDescriptor>(8).unwrap();
        let (granted, start) = prod.reserve(4);
        for i in 0..granted {
            prod.write(start + i, fill(i as u64)).unwrap();
        }
        prod.submit(2).unwrap();
        assert_eq!(prod.reserved(), 2);

        assert_eq!(cons.peek(8).0, 2);
        prod.submit(2).unwrap();
        let (available, start) = cons.peek(8);
        assert_eq!((available, start), (2, 2));
        assert_eq!(cons.read(start + 1).unwrap(), fill(3));
    }

    #[test]
    fn test_cancel_on_both_ends() {
        let (mut prod, mut cons) = ring_pair::<FillDescriptor>(8).unwrap();
        prod.reserve(4);
        prod.cancel(3).unwrap();
        assert_eq!(prod.reserved(), 1);
        assert!(prod.cancel(2).is_err());
        prod.write(0, fill(7)).unwrap();
        prod.submit(1).unwrap();

        let (available, _) = cons.peek(4);
        assert_eq!(available, 1);
        cons.cancel(1).unwrap();
        assert_eq!(cons.peeked(), 0);
        let (available, start) = cons.peek(4);
        assert_eq!((available, start), (1, 0));
        assert_eq!(cons.read(start).unwrap(), fill(7));
    }

    #[test]
    fn test_wrap_around_index_space() {
        // Indices start just below u32::MAX to exercise the modular arithmetic.
        let header = Box::new(RingHeader::default());
        header.producer.0.store(u32::MAX - 2, Ordering::Relaxed);
        header.consumer.0.store(u32::MAX - 2, Ordering::Relaxed);
        let descs: Box<[UnsafeCell<FillDescriptor>]> =
            (0..4).map(|_| UnsafeCell::new(FillDescriptor::default())).collect();

        let ring = unsafe {
            RingShared::from_raw_parts(
                NonNull::from(&header.producer.0),
                NonNull::from(&header.consumer.0),
                NonNull::new(descs.as_ptr() as *mut FillDescriptor).unwrap(),
                4,
            )
            .unwrap()
        };
        let (mut prod, mut cons) = split(ring);

        for round in 0..4u64 {
            let (granted, start) = prod.reserve(4);
            assert_eq!(granted, 4);
            for i in 0..granted {
                prod.write(start.wrapping_add(i), fill(round * 10 + i as u64))
                    .unwrap();
            }
            prod.submit(granted).unwrap();

            let (available, start) = cons.peek(4);
            assert_eq!(available, 4);
            for i in 0..available {
                assert_eq!(
                    cons.read(start.wrapping_add(i)).unwrap(),
                    fill(round * 10 + i as u64)
                );
            }
            cons.release(available).unwrap();
        }

        assert_eq!(header.producer.0.load(Ordering::Relaxed), 13);
        drop((prod, cons));
    }

    #[test]
    fn test_reclaim_and_drain() {
        let (mut prod, mut cons) = ring_pair::<FillDescriptor>(8).unwrap();
        let (granted, start) = prod.reserve(6);
        for i in 0..granted {
            prod.write(start + i, fill(i as u64)).unwrap();
        }
        prod.submit(5).unwrap();

        // Consumer takes two, then goes away
        let (available, _) = cons.peek(2);
        cons.release(available).unwrap();
        drop(cons);

        let mut out = Vec::new();
        assert_eq!(prod.reclaim_outstanding(&mut out), 3);
        assert_eq!(out, vec![fill(2), fill(3), fill(4)]);
        assert_eq!(prod.in_flight(), 0);
        assert_eq!(prod.reserved(), 0);

        let (mut prod, mut cons) = ring_pair::<RxDescriptor>(4).unwrap();
        let (granted, start) = prod.reserve(3);
        for i in 0..granted {
            prod.write(
                start + i,
                RxDescriptor {
                    addr: i as u64,
                    len: 1,
                    options: 0,
                },
            )
            .unwrap();
        }
        prod.submit(granted).unwrap();

        let mut out = Vec::new();
        assert_eq!(cons.drain(&mut out), 3);
        assert_eq!(out.len(), 3);
        assert_eq!(cons.in_flight(), 0);
        assert_eq!(prod.reserve(4).0, 4);
    }

    #[test]
    fn test_concurrent_batches_preserve_order() {
        const TOTAL: u64 = 200_000;
        let (mut prod, mut cons) = ring_pair::<FillDescriptor>(256).unwrap();

        let producer = thread::spawn(move || {
            let mut next = 0u64;
            while next < TOTAL {
                let want = (TOTAL - next).min(32) as u32;
                let (granted, start) = prod.reserve(want);
                if granted == 0 {
                    std::hint::spin_loop();
                    continue;
                }
                for i in 0..granted {
                    prod.write(start.wrapping_add(i), fill(next + i as u64))
                        .unwrap();
                }
                prod.submit(granted).unwrap();
                next += granted as u64;
            }
        });

        let consumer = thread::spawn(move || {
            let mut expected = 0u64;
            let mut batches = 0u32;
            while expected < TOTAL {
                let (available, start) = cons.peek(64);
                if available == 0 {
                    std::hint::spin_loop();
                    continue;
                }
                for i in 0..available {
                    assert_eq!(cons.read(start.wrapping_add(i)).unwrap().addr, expected);
                    expected += 1;
                }
                cons.release(available).unwrap();
                batches += 1;
            }
            batches
        });

        producer.join().unwrap();
        let batches = consumer.join().unwrap();
        assert!(batches > 0);
    }
}
