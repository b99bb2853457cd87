//! Mounts a mock device through the kernel. Needs /dev/fuse and fusermount3.

use clap::Parser;
use libmtp::mock::{MockBus, MockDevice};
use mtpfs::args::Args;
use mtpfs::config::Config;
use mtpfs::lifecycle;
use mtpfs::mount::FuseStack;
use tokio::sync::oneshot;

const INTERNAL: u32 = 0x0001_0001;

#[tokio::test(flavor = "multi_thread")]
async fn mount_list_write_and_unmount() {
    if std::env::var("MTPFS_FUSE_TEST").ok().as_deref() != Some("1") {
        eprintln!("skip mount_list_write_and_unmount: set MTPFS_FUSE_TEST=1 to enable");
        return;
    }

    let dev = MockDevice::new("Mock Phone")
        .with_storage(INTERNAL, MockDevice::storage("Internal Storage", false));
    let music = dev.add_folder(INTERNAL, 0, "Music");
    dev.add_file(INTERNAL, music, "song.mp3", b"ID3 data");
    let bus = MockBus::new(vec![dev.clone()]);

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_path_buf();
    let config = Config::from_args(
        Args::try_parse_from(["mtpfs".to_string(), root.display().to_string()]).unwrap(),
    )
    .unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let probe = tokio::task::spawn_blocking(move || {
        let storage = root.join("Internal Storage");
        // the mount shows up asynchronously
        for _ in 0..50 {
            if storage.exists() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
        let song = std::fs::read(storage.join("Music/song.mp3"));
        let written = std::fs::write(storage.join("hello.txt"), b"hi there");
        let _ = stop.send(());
        (song, written)
    });

    lifecycle::run(&config, &bus, &FuseStack, async {
        let _ = stopped.await;
    })
    .await
    .unwrap();

    let (song, written) = probe.await.unwrap();
    assert_eq!(song.unwrap(), b"ID3 data");
    written.unwrap();
    let h = dev.find(INTERNAL, 0, "hello.txt").unwrap();
    assert_eq!(dev.contents(h).unwrap(), b"hi there");
    assert_eq!(dev.stats().close_calls, 1);
}
