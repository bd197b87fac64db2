//! Frame conservation across a threaded source, and pool backings end to end

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread, time::Duration};

    use framering::{
        umem::page_size, BackingType, CancellationToken, FramePool, GeneratorConfig,
        InMemoryDispatchTable, LoopbackHost, LoopbackSource, PollLoop, PollOutcome,
        ProcessResult, RxBatch, StopReason, XskConfig,
    };

    fn open(config: &XskConfig) -> (PollLoop, LoopbackSource) {
        let table = Arc::new(InMemoryDispatchTable::new("xsks_map", 64));
        let mut host = LoopbackHost::new(table.clone());
        let poll_loop = PollLoop::open(config, &mut host, table).expect("open failed");
        (poll_loop, host.take_source().expect("no source attached"))
    }

    #[test]
    fn test_threaded_source_conserves_frames() {
        const PACKETS: u64 = 20_000;
        let config = XskConfig::default()
            .with_frame_size(page_size() as u32)
            .with_frame_count(256)
            .with_ring_size(64)
            .with_batch_size(16)
            .with_idle_wait(Duration::from_millis(1));
        let (poll_loop, source) = open(&config);

        let cancel = CancellationToken::new();
        let payload: Vec<u8> = (0..128u32).map(|i| i as u8).collect();
        let generator = source.spawn_generator(
            GeneratorConfig {
                payload: payload.clone(),
                burst: 24,
                limit: Some(PACKETS),
                ..GeneratorConfig::default()
            },
            cancel.clone(),
        );

        // Bound the test if something stalls.
        let watchdog = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                cancel.wait_timeout(Duration::from_secs(30));
                cancel.cancel();
            })
        };

        let mut frames = 0u64;
        let mut corrupted = 0u64;
        let report = poll_loop
            .run(
                &mut |batch: &RxBatch<'_>| {
                    for frame in batch.iter() {
                        frames += 1;
                        if frame.data() != payload.as_slice() {
                            corrupted += 1;
                        }
                    }
                    if frames >= PACKETS {
                        ProcessResult::Stop
                    } else {
                        ProcessResult::Continue
                    }
                },
                &cancel,
            )
            .unwrap();

        cancel.cancel();
        watchdog.join().unwrap();
        let source = generator.join().unwrap().unwrap();

        assert_eq!(report.stop_reason, StopReason::Processor);
        assert_eq!(frames, PACKETS);
        assert_eq!(corrupted, 0);
        assert_eq!(source.stats().delivered, PACKETS);
        assert_eq!(source.stats().dropped_unrouted, 0);
        assert_eq!(report.stats.desyncs, 0);
        assert!(report.occupancy.is_empty());
        assert_eq!(report.pool.free, 256);
        assert!(report.pool_released);
    }

    #[test]
    fn test_address_round_trip() {
        let pool = FramePool::allocate(page_size() as u32, 4096).unwrap();
        for i in 0..pool.frame_count() {
            assert_eq!(pool.index_of(pool.address_of(i).unwrap()).unwrap(), i);
        }
    }

    #[test]
    fn test_file_backed_pool_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frames.bin");
        let frame_size = page_size() as u32;
        let config = XskConfig::default()
            .with_frame_size(frame_size)
            .with_frame_count(8)
            .with_ring_size(4)
            .with_batch_size(4)
            .with_headroom(128)
            .with_backing(BackingType::File { path: path.clone() });
        let (mut poll_loop, mut source) = open(&config);
        poll_loop.prime().unwrap();

        assert_eq!(source.deliver(&[&b"on disk"[..]]).unwrap(), 1);
        let mut addrs = Vec::new();
        let outcome = poll_loop
            .poll_once(&mut |batch: &RxBatch<'_>| {
                addrs.extend(batch.iter().map(|f| f.addr));
                ProcessResult::Continue
            })
            .unwrap();
        assert_eq!(outcome, PollOutcome::Processed(1));
        assert_eq!(addrs, vec![128]);

        let contents = std::fs::read(&path).unwrap();
        assert_eq!(contents.len(), 8 * frame_size as usize);
        assert_eq!(&contents[128..135], b"on disk");

        let report = poll_loop.shutdown().unwrap();
        assert_eq!(report.pool.free, 8);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memfd_backed_pool() {
        let config = XskConfig::default()
            .with_frame_size(page_size() as u32)
            .with_frame_count(16)
            .with_ring_size(8)
            .with_batch_size(8)
            .with_backing(BackingType::MemFd);
        let (mut poll_loop, mut source) = open(&config);
        assert!(poll_loop.socket().pool().region().backing_fd().is_some());

        poll_loop.prime().unwrap();
        let packets: Vec<&[u8]> = vec![&b"shared"[..]; 3];
        assert_eq!(source.deliver(&packets).unwrap(), 3);
        assert_eq!(
            poll_loop.poll_once(&mut framering::FrameCounter::new()).unwrap(),
            PollOutcome::Processed(3)
        );
        assert_eq!(poll_loop.shutdown().unwrap().pool.free, 16);
    }

    #[test]
    fn test_egress_alongside_ingress() {
        let config = XskConfig::default()
            .with_frame_size(page_size() as u32)
            .with_frame_count(16)
            .with_ring_size(4)
            .with_batch_size(4);
        let (mut poll_loop, mut source) = open(&config);
        poll_loop.prime().unwrap();

        let payloads: Vec<&[u8]> = vec![&b"reply-1"[..], &b"reply-2"[..]];
        assert_eq!(poll_loop.socket_mut().transmit(&payloads).unwrap(), 2);
        assert_eq!(poll_loop.socket().occupancy().tx, 2);

        assert_eq!(source.complete_tx(8).unwrap(), 2);
        assert_eq!(poll_loop.socket_mut().reclaim_completions(8).unwrap(), 2);
        assert_eq!(source.stats().completed, 2);

        let socket = poll_loop.socket();
        assert_eq!(socket.pool().free_count() + socket.occupancy().total(), 16);
        assert_eq!(poll_loop.shutdown().unwrap().pool.free, 16);
    }
}
