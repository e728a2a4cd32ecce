#![cfg(all(unix, feature = "dispatch"))]

use std::thread;
use std::time::Duration;

use cmdlink::dispatch::{Dispatcher, DispatcherConfig};
use cmdlink::frame::{Command, DeviceEnd};
use cmdlink::transport::loopback_pair;

#[test]
fn reexports_cover_a_full_exchange() {
    let (host, mut device) = loopback_pair().expect("loopback should open");
    device.set_read_timeout(Some(Duration::from_secs(2)));

    let sim = thread::spawn(move || {
        let mut device = DeviceEnd::new(device);
        let command = device.read_command().expect("command should arrive");
        device
            .reply_text(&command, b"42")
            .expect("reply should be written");
    });

    let dispatcher = Dispatcher::spawn(host, DispatcherConfig::default().with_label("facade"))
        .expect("dispatcher should start");
    let answer = dispatcher
        .submit(&Command::text(b'V', &[]), |payload| {
            String::from_utf8_lossy(&payload).parse::<u32>()
        })
        .expect("submit should succeed");

    assert_eq!(answer.wait(), Ok(42));
    sim.join().expect("simulator should exit");
}
