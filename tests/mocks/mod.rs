//! Mock infrastructure for testing.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use watchpost::monitors::{
    CaptureEvent, Packet, PacketSource, PacketStream, ProcessSighting, ProcessTable, Transport,
};
use watchpost::sink::MemorySink;

/// Process table whose contents the test swaps between polls.
#[derive(Default)]
pub struct FakeProcessTable {
    processes: Mutex<Vec<ProcessSighting>>,
    snapshots: AtomicUsize,
}

impl FakeProcessTable {
    pub fn new(processes: Vec<ProcessSighting>) -> Arc<Self> {
        Arc::new(Self {
            processes: Mutex::new(processes),
            snapshots: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, processes: Vec<ProcessSighting>) {
        *self.processes.lock().unwrap() = processes;
    }

    pub fn snapshots(&self) -> usize {
        self.snapshots.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` more snapshots have been taken.
    pub async fn wait_for_snapshots(&self, n: usize) {
        let target = self.snapshots() + n;
        wait_until(Duration::from_secs(5), || self.snapshots() >= target).await;
    }
}

impl ProcessTable for FakeProcessTable {
    fn snapshot(&self) -> Result<Vec<ProcessSighting>> {
        let processes = self.processes.lock().unwrap().clone();
        self.snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(processes)
    }
}

pub fn sighting(pid: u32, name: &str) -> ProcessSighting {
    ProcessSighting::new(pid, name, "tester")
}

/// Packet source that replays a fixed script, then idles until stopped.
pub struct ScriptedPacketSource {
    script: Mutex<Vec<CaptureEvent>>,
    fail_open: bool,
    opened: AtomicUsize,
}

impl ScriptedPacketSource {
    pub fn new(packets: Vec<Packet>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(packets.into_iter().map(CaptureEvent::Packet).collect()),
            fail_open: false,
            opened: AtomicUsize::new(0),
        })
    }

    pub fn with_events(events: Vec<CaptureEvent>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(events),
            fail_open: false,
            opened: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Vec::new()),
            fail_open: true,
            opened: AtomicUsize::new(0),
        })
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

struct ScriptedStream {
    events: VecDeque<CaptureEvent>,
}

impl PacketStream for ScriptedStream {
    fn next_event(&mut self) -> Result<CaptureEvent> {
        match self.events.pop_front() {
            Some(event) => Ok(event),
            None => {
                std::thread::sleep(Duration::from_millis(5));
                Ok(CaptureEvent::Idle)
            }
        }
    }
}

impl PacketSource for ScriptedPacketSource {
    fn open(&self, interface: &str) -> Result<Box<dyn PacketStream>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            bail!("No such device: {}", interface);
        }
        let events = std::mem::take(&mut *self.script.lock().unwrap());
        Ok(Box::new(ScriptedStream { events: events.into() }))
    }
}

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

pub fn tcp(src: &str, sport: u16, dst: &str, dport: u16) -> Packet {
    Packet::new(ip(src), ip(dst), Transport::Tcp { sport, dport })
}

pub fn udp(src: &str, sport: u16, dst: &str, dport: u16) -> Packet {
    Packet::new(ip(src), ip(dst), Transport::Udp { sport, dport })
}

pub fn icmp(src: &str, dst: &str, icmp_type: u8) -> Packet {
    Packet::new(ip(src), ip(dst), Transport::Icmp { icmp_type })
}

/// Poll `cond` until it holds or `timeout` elapses. Returns the final value.
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn memory_sink() -> Arc<MemorySink> {
    Arc::new(MemorySink::new())
}
