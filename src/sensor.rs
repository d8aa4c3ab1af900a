use crate::types::AccelSample;
use crate::{MexError, Result};
use std::sync::{Arc, Mutex};

/// Platform id of a physical sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorId(pub u64);

/// Platform id of a sensor listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(pub u64);

/// Device sensor service the sampler drives.
///
/// The platform pushes every tick into the [`SampleSink`] handed to
/// [`SensorPlatform::set_sample_sink`], from whichever thread it likes.
pub trait SensorPlatform: Send {
    fn default_accelerometer(&mut self) -> Option<SensorId>;
    fn create_listener(&mut self, sensor: SensorId) -> std::result::Result<ListenerId, String>;
    fn set_sample_sink(
        &mut self,
        listener: ListenerId,
        sink: SampleSink,
    ) -> std::result::Result<(), String>;
    fn start_listener(&mut self, listener: ListenerId) -> std::result::Result<(), String>;
    fn stop_listener(&mut self, listener: ListenerId) -> std::result::Result<(), String>;
    fn read_listener(&mut self, listener: ListenerId) -> std::result::Result<AccelSample, String>;
    fn destroy_listener(&mut self, listener: ListenerId) -> std::result::Result<(), String>;
}

/// Display power lock service.
pub trait PowerLock: Send {
    fn acquire_display(&mut self) -> std::result::Result<(), String>;
    fn release_display(&mut self) -> std::result::Result<(), String>;
}

/// Latest-sample-wins cell shared between the sensor callback and the send path.
///
/// The whole triple is written and read under one lock, so a snapshot never
/// mixes axes from two ticks.
#[derive(Debug, Clone, Default)]
pub struct SampleSink {
    latest: Arc<Mutex<AccelSample>>,
}

impl SampleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the current sample.
    pub fn on_sample(&self, x: f32, y: f32, z: f32) {
        self.store(AccelSample::new(x, y, z));
    }

    pub fn store(&self, sample: AccelSample) {
        let mut latest = self.latest.lock().unwrap_or_else(|e| e.into_inner());
        *latest = sample;
    }

    pub fn snapshot(&self) -> AccelSample {
        *self.latest.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owns the accelerometer listener and the display wake lock.
pub struct SensorSampler {
    platform: Box<dyn SensorPlatform>,
    power: Box<dyn PowerLock>,
    sink: SampleSink,
    sensor: Option<SensorId>,
    listener: Option<ListenerId>,
    running: bool,
    display_held: bool,
}

impl SensorSampler {
    pub fn new(platform: Box<dyn SensorPlatform>, power: Box<dyn PowerLock>) -> Self {
        Self {
            platform,
            power,
            sink: SampleSink::new(),
            sensor: None,
            listener: None,
            running: false,
            display_held: false,
        }
    }

    /// Handle the platform (or a UI thread) can write samples through.
    pub fn sink(&self) -> SampleSink {
        self.sink.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn holds_display(&self) -> bool {
        self.display_held
    }

    /// Stop any running listener, then start a fresh one on the default accelerometer.
    pub fn start(&mut self) -> Result<()> {
        self.stop()?;

        let listener = match self.listener {
            Some(listener) => listener,
            None => self.bind_listener()?,
        };

        self.platform
            .start_listener(listener)
            .map_err(MexError::ListenerError)?;
        self.running = true;
        log::info!("Accelerometer listener {:?} started", listener);
        Ok(())
    }

    fn bind_listener(&mut self) -> Result<ListenerId> {
        let sensor = self
            .platform
            .default_accelerometer()
            .ok_or(MexError::SensorUnavailable)?;
        self.sensor = Some(sensor);

        let listener = self
            .platform
            .create_listener(sensor)
            .map_err(MexError::ListenerError)?;

        if let Err(e) = self.platform.set_sample_sink(listener, self.sink.clone()) {
            if let Err(e) = self.platform.destroy_listener(listener) {
                log::error!("Listener destroy failed: {}", e);
            }
            return Err(MexError::ListenerError(e));
        }
        self.listener = Some(listener);
        Ok(listener)
    }

    /// Halt the listener. A no-op when nothing is running.
    pub fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        if let Some(listener) = self.listener {
            self.platform
                .stop_listener(listener)
                .map_err(MexError::ListenerError)?;
        }
        self.running = false;
        log::debug!("Accelerometer listener stopped");
        Ok(())
    }

    pub fn on_sample(&self, x: f32, y: f32, z: f32) {
        self.sink.on_sample(x, y, z);
    }

    pub fn snapshot(&self) -> AccelSample {
        self.sink.snapshot()
    }

    /// Read the listener synchronously and store the result as the latest sample.
    pub fn poll(&mut self) -> Result<AccelSample> {
        let listener = self
            .listener
            .ok_or_else(|| MexError::ListenerError("listener not created".into()))?;
        let sample = self
            .platform
            .read_listener(listener)
            .map_err(MexError::ListenerError)?;
        self.sink.store(sample);
        Ok(sample)
    }

    /// Keep the display on while the session runs.
    pub fn hold_display(&mut self) {
        if self.display_held {
            return;
        }
        match self.power.acquire_display() {
            Ok(()) => self.display_held = true,
            Err(e) => log::error!("Display lock request failed: {}", e),
        }
    }

    /// Stop, destroy the listener and release the display lock.
    ///
    /// Every step runs even if an earlier one fails; safe to call twice.
    pub fn finalize(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Listener stop failed during finalize: {}", e);
            self.running = false;
        }

        if let Some(listener) = self.listener.take() {
            if let Err(e) = self.platform.destroy_listener(listener) {
                log::error!("Listener destroy failed: {}", e);
            }
        }
        self.sensor = None;

        if self.display_held {
            if let Err(e) = self.power.release_display() {
                log::error!("Display lock release failed: {}", e);
            }
            self.display_held = false;
        }
    }
}

impl Drop for SensorSampler {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Log {
        calls: Vec<&'static str>,
        fail_stop: bool,
        fail_sink: bool,
    }

    struct FakeSensor {
        log: Arc<Mutex<Log>>,
        has_sensor: bool,
    }

    impl SensorPlatform for FakeSensor {
        fn default_accelerometer(&mut self) -> Option<SensorId> {
            self.has_sensor.then_some(SensorId(1))
        }
        fn create_listener(&mut self, _: SensorId) -> std::result::Result<ListenerId, String> {
            self.log.lock().unwrap().calls.push("create");
            Ok(ListenerId(7))
        }
        fn set_sample_sink(
            &mut self,
            _: ListenerId,
            _: SampleSink,
        ) -> std::result::Result<(), String> {
            if self.log.lock().unwrap().fail_sink {
                Err("no callback slot".into())
            } else {
                Ok(())
            }
        }
        fn start_listener(&mut self, _: ListenerId) -> std::result::Result<(), String> {
            self.log.lock().unwrap().calls.push("start");
            Ok(())
        }
        fn stop_listener(&mut self, _: ListenerId) -> std::result::Result<(), String> {
            let mut log = self.log.lock().unwrap();
            log.calls.push("stop");
            if log.fail_stop {
                Err("busy".into())
            } else {
                Ok(())
            }
        }
        fn read_listener(&mut self, _: ListenerId) -> std::result::Result<AccelSample, String> {
            Ok(AccelSample::new(0.1, 0.2, 9.7))
        }
        fn destroy_listener(&mut self, _: ListenerId) -> std::result::Result<(), String> {
            self.log.lock().unwrap().calls.push("destroy");
            Ok(())
        }
    }

    struct FakePower(Arc<Mutex<Log>>);

    impl PowerLock for FakePower {
        fn acquire_display(&mut self) -> std::result::Result<(), String> {
            self.0.lock().unwrap().calls.push("lock");
            Ok(())
        }
        fn release_display(&mut self) -> std::result::Result<(), String> {
            self.0.lock().unwrap().calls.push("unlock");
            Ok(())
        }
    }

    fn sampler(has_sensor: bool) -> (SensorSampler, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let sampler = SensorSampler::new(
            Box::new(FakeSensor {
                log: log.clone(),
                has_sensor,
            }),
            Box::new(FakePower(log.clone())),
        );
        (sampler, log)
    }

    #[test]
    fn test_start_without_sensor_fails() {
        let (mut sampler, _) = sampler(false);
        assert!(matches!(sampler.start(), Err(MexError::SensorUnavailable)));
        assert!(!sampler.is_running());
    }

    #[test]
    fn test_restart_stops_first_and_reuses_listener() {
        let (mut sampler, log) = sampler(true);
        sampler.start().unwrap();
        sampler.start().unwrap();
        assert_eq!(log.lock().unwrap().calls, vec!["create", "start", "stop", "start"]);
    }

    #[test]
    fn test_failed_sink_install_does_not_keep_listener() {
        let (mut sampler, log) = sampler(true);
        log.lock().unwrap().fail_sink = true;
        assert!(matches!(sampler.start(), Err(MexError::ListenerError(_))));
        assert!(!sampler.is_running());
        assert_eq!(log.lock().unwrap().calls, vec!["create", "destroy"]);

        log.lock().unwrap().fail_sink = false;
        sampler.start().unwrap();
        assert_eq!(
            log.lock().unwrap().calls,
            vec!["create", "destroy", "create", "start"]
        );
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let (mut sampler, log) = sampler(true);
        sampler.stop().unwrap();
        assert!(log.lock().unwrap().calls.is_empty());
    }

    #[test]
    fn test_latest_sample_wins() {
        let (sampler, _) = sampler(true);
        sampler.on_sample(1.0, 2.0, 3.0);
        sampler.on_sample(4.0, 5.0, 6.0);
        assert_eq!(sampler.snapshot(), AccelSample::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_poll_stores_reading() {
        let (mut sampler, _) = sampler(true);
        sampler.start().unwrap();
        let sample = sampler.poll().unwrap();
        assert_eq!(sampler.snapshot(), sample);
    }

    #[test]
    fn test_finalize_releases_everything_even_if_stop_fails() {
        let (mut sampler, log) = sampler(true);
        sampler.start().unwrap();
        sampler.hold_display();
        log.lock().unwrap().fail_stop = true;
        sampler.finalize();
        sampler.finalize();
        assert_eq!(
            log.lock().unwrap().calls,
            vec!["create", "start", "lock", "stop", "destroy", "unlock"]
        );
        assert!(!sampler.holds_display());
    }

    #[test]
    fn test_snapshot_never_tears_across_threads() {
        let sink = SampleSink::new();
        let writer = sink.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..10_000 {
                let v = i as f32;
                writer.on_sample(v, v, v);
            }
        });
        for _ in 0..10_000 {
            let s = sink.snapshot();
            assert!(s.x == s.y && s.y == s.z);
        }
        handle.join().unwrap();
    }
}
