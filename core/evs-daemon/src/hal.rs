//! Simulated camera HAL.
//!
//! Generates synthetic frames on a background thread at a fixed interval.
//! Buffers stay in flight until the service returns them; once the in-flight
//! limit is reached the generator reports `FRAME_DROPPED` instead.

use chrono::Utc;
use evs_core::{EvsError, HalEventSink, HalFrame, HalSession, Result, StreamEvent};
use evs_protocol::BUFFER_DATA_MASK;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct FrameGenerator {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct SimulatedHal {
    sink: HalEventSink,
    frame_interval: Duration,
    max_in_flight: usize,
    connected: bool,
    camera_id: Option<String>,
    in_flight: Arc<Mutex<HashSet<u32>>>,
    generator: Option<FrameGenerator>,
}

impl SimulatedHal {
    pub fn new(sink: HalEventSink, frame_interval: Duration, max_in_flight: usize) -> Self {
        Self {
            sink,
            frame_interval,
            max_in_flight: max_in_flight.max(1),
            connected: false,
            camera_id: None,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            generator: None,
        }
    }

    fn stop_generator(&mut self) {
        if let Some(generator) = self.generator.take() {
            generator.running.store(false, Ordering::SeqCst);
            if generator.handle.join().is_err() {
                tracing::warn!(
                    service_type = %self.sink.service_type(),
                    "Frame generator thread panicked"
                );
            }
        }
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl HalSession for SimulatedHal {
    fn connect_if_necessary(&mut self) -> Result<()> {
        if !self.connected {
            tracing::debug!(service_type = %self.sink.service_type(), "Simulated HAL connected");
            self.connected = true;
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        self.stop_generator();
        self.camera_id = None;
        self.connected = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn open_camera(&mut self, camera_id: &str) -> Result<()> {
        if !self.connected {
            return Err(EvsError::hal("open camera", "not connected"));
        }
        if camera_id.trim().is_empty() {
            return Err(EvsError::hal("open camera", "camera id is empty"));
        }
        self.camera_id = Some(camera_id.to_string());
        Ok(())
    }

    fn close_camera(&mut self) {
        self.camera_id = None;
    }

    fn start_stream(&mut self) -> Result<()> {
        let Some(camera_id) = self.camera_id.clone() else {
            return Err(EvsError::hal("start stream", "no camera is open"));
        };
        if self.generator.is_some() {
            return Ok(());
        }

        let running = Arc::new(AtomicBool::new(true));
        let handle = spawn_generator(
            camera_id,
            self.sink.clone(),
            self.frame_interval,
            self.max_in_flight,
            Arc::clone(&self.in_flight),
            Arc::clone(&running),
        );
        self.generator = Some(FrameGenerator { running, handle });
        self.sink.on_stream_event(StreamEvent::StreamStarted);
        Ok(())
    }

    fn stop_stream(&mut self) {
        self.stop_generator();
    }

    fn done_with_frame(&mut self, buffer_id: u32) {
        let removed = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&buffer_id);
        if !removed {
            tracing::debug!(buffer_id, "Buffer returned that was not in flight");
        }
    }
}

impl Drop for SimulatedHal {
    fn drop(&mut self) {
        self.stop_generator();
    }
}

fn spawn_generator(
    camera_id: String,
    sink: HalEventSink,
    interval: Duration,
    max_in_flight: usize,
    in_flight: Arc<Mutex<HashSet<u32>>>,
    running: Arc<AtomicBool>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut next_id: u32 = 0;
        while running.load(Ordering::SeqCst) {
            thread::sleep(interval);
            if !running.load(Ordering::SeqCst) {
                break;
            }

            let buffer_id = {
                let mut in_flight = in_flight
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if in_flight.len() >= max_in_flight {
                    None
                } else {
                    next_id = next_id.wrapping_add(1) & BUFFER_DATA_MASK;
                    in_flight.insert(next_id);
                    Some(next_id)
                }
            };

            match buffer_id {
                Some(buffer_id) => sink.on_frame(HalFrame {
                    buffer_id,
                    timestamp_ms: Utc::now().timestamp_millis(),
                    payload: synthetic_payload(&camera_id, buffer_id),
                }),
                None => sink.on_stream_event(StreamEvent::FrameDropped),
            }
        }
    })
}

fn synthetic_payload(camera_id: &str, buffer_id: u32) -> Arc<[u8]> {
    let mut payload = Vec::with_capacity(4 + camera_id.len());
    payload.extend_from_slice(&buffer_id.to_le_bytes());
    payload.extend_from_slice(camera_id.as_bytes());
    Arc::from(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use evs_core::{Scheduler, ServiceType};

    #[test]
    fn synthetic_payload_tags_buffer_and_camera() {
        let payload = synthetic_payload("/dev/video10", 7);
        assert_eq!(&payload[..4], &7u32.to_le_bytes());
        assert_eq!(&payload[4..], b"/dev/video10");
    }

    #[test]
    fn open_camera_requires_connection_and_camera_id() {
        let (tx, _events) = crossbeam::channel::unbounded();
        let sink = HalEventSink::new(ServiceType::Rearview, Scheduler::new(tx));
        let mut hal = SimulatedHal::new(sink, Duration::from_millis(5), 2);
        assert!(hal.open_camera("/dev/video10").is_err());

        hal.connect_if_necessary().unwrap();
        assert!(hal.open_camera("  ").is_err());
        assert!(hal.open_camera("/dev/video10").is_ok());
        assert!(hal.start_stream().is_ok());
        hal.disconnect();
        assert!(!hal.is_connected());
        assert!(hal.start_stream().is_err());
    }
}
