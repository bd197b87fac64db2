//! Loading configuration files and opening a loop from them

#[cfg(test)]
mod tests {
    use std::{io::Write, sync::Arc};

    use framering::{
        umem::page_size, BackingType, DesyncPolicy, FrameRingError, InMemoryDispatchTable,
        LoopbackHost, PollLoop, XskConfig,
    };

    #[test]
    fn test_config_file_drives_loop() {
        let dir = tempfile::tempdir().unwrap();
        let frames_path = dir.path().join("umem.bin");
        let json = format!(
            r#"{{
                "interface": "eth0",
                "queue_id": 3,
                "frame_size": {},
                "frame_count": 32,
                "fill_ring_size": 16,
                "completion_ring_size": 16,
                "rx_ring_size": 16,
                "tx_ring_size": 16,
                "batch_size": 8,
                "idle_wait_us": 200,
                "desync_policy": {{ "mode": "fatal" }},
                "backing": {{ "type": "file", "path": {:?} }}
            }}"#,
            page_size(),
            frames_path.to_string_lossy()
        );

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let config = XskConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.queue_id, 3);
        assert_eq!(config.desync_policy, DesyncPolicy::Fatal);
        assert_eq!(
            config.backing,
            BackingType::File {
                path: frames_path.clone()
            }
        );

        let table = Arc::new(InMemoryDispatchTable::new("xsks_map", 8));
        let mut host = LoopbackHost::new(table.clone());
        let mut poll_loop = PollLoop::open(&config, &mut host, table.clone()).unwrap();
        assert_eq!(poll_loop.prime().unwrap(), 16);
        assert_eq!(poll_loop.socket().pool().free_count(), 16);
        assert!(frames_path.exists());

        let report = poll_loop.shutdown().unwrap();
        assert_eq!(report.pool.free, 32);
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = XskConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, FrameRingError::Io { .. }));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = XskConfig::new("eth2", 5)
            .with_frame_size(page_size() as u32)
            .with_ring_size(256)
            .with_desync_policy(DesyncPolicy::Resync { max_consecutive: 8 });
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(XskConfig::from_json_str(&json).unwrap(), config);
    }
}
