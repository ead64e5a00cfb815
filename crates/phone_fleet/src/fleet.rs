//! Fleet-wide operations over the devices from the latest scan

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{info, warn};

use crate::adb::{
    device, random_line, text_commands, CommandOutput, CommandRunner, DeviceRegistry, KeyCode,
    Resolution, ScrollDirection, TextStrategy,
};
use crate::config::{get_app, resolve_package, TIMING_CONFIG};
use crate::context::ExecutionContext;
use crate::dispatch::{BatchReport, CommandOptions, CommandSource, DispatchHandle, DispatchPool};
use crate::error::{FleetError, Result};
use crate::locator::ElementLocator;

/// Asked before destructive operations; returns true to proceed
pub type ConfirmationCallback = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Resolution assumed when a device does not report one
const FALLBACK_RESOLUTION: Resolution = Resolution {
    width: 1080,
    height: 2400,
};

pub struct Fleet {
    ctx: Arc<ExecutionContext>,
    registry: Arc<DeviceRegistry>,
    pool: Arc<DispatchPool>,
    confirmation_callback: Option<ConfirmationCallback>,
}

impl Fleet {
    pub fn new(runner: CommandRunner) -> Self {
        let ctx = Arc::new(ExecutionContext::new());
        let pool = DispatchPool::new(ctx.clone(), runner);
        Self::from_parts(ctx, pool)
    }

    pub fn with_pool_size(runner: CommandRunner, size: usize) -> Self {
        let ctx = Arc::new(ExecutionContext::new());
        let pool = DispatchPool::with_size(ctx.clone(), runner, size);
        Self::from_parts(ctx, pool)
    }

    fn from_parts(ctx: Arc<ExecutionContext>, pool: DispatchPool) -> Self {
        Self {
            ctx,
            registry: Arc::new(DeviceRegistry::new()),
            pool: Arc::new(pool),
            confirmation_callback: None,
        }
    }

    pub fn with_confirmation(mut self, callback: ConfirmationCallback) -> Self {
        self.confirmation_callback = Some(callback);
        self
    }

    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<DispatchPool> {
        &self.pool
    }

    pub fn runner(&self) -> &CommandRunner {
        self.pool.runner()
    }

    pub fn locator(&self) -> ElementLocator {
        ElementLocator::new(self.runner().clone())
    }

    /// Scan for ready devices and replace the device set
    pub async fn discover(&self) -> Result<Vec<String>> {
        self.registry.scan(self.runner(), &self.ctx.token()).await
    }

    /// Serials of the current set; an empty set prevents any batch from starting
    pub fn targets(&self) -> Result<Vec<String>> {
        let serials = self.registry.serials();
        if serials.is_empty() {
            return Err(FleetError::NoDevices);
        }
        Ok(serials)
    }

    /// Run `source` on every device in the current set
    pub async fn broadcast(
        &self,
        intent: &str,
        source: CommandSource,
        options: CommandOptions,
    ) -> Result<BatchReport> {
        let serials = self.targets()?;
        Ok(self.pool.run_batch(intent, &source, &serials, options).await)
    }

    pub async fn tap(&self, x: i32, y: i32) -> Result<BatchReport> {
        self.broadcast(
            &format!("Tap ({x}, {y})"),
            device::tap(x, y).into(),
            CommandOptions::default(),
        )
        .await
    }

    pub async fn long_press(&self, x: i32, y: i32) -> Result<BatchReport> {
        self.broadcast(
            &format!("Long press ({x}, {y})"),
            device::long_press(x, y, device::LONG_PRESS_MS).into(),
            CommandOptions::default(),
        )
        .await
    }

    pub async fn swipe(
        &self,
        from: (i32, i32),
        to: (i32, i32),
        duration_ms: u32,
    ) -> Result<BatchReport> {
        self.broadcast(
            "Swipe",
            device::swipe(from.0, from.1, to.0, to.1, duration_ms).into(),
            CommandOptions::default(),
        )
        .await
    }

    /// Press a hardware key everywhere; destructive keys need confirmation
    pub async fn key(&self, key: KeyCode) -> Result<BatchReport> {
        if key.is_destructive() {
            let prompt = format!("Press {key} on every device?");
            let confirmed = self
                .confirmation_callback
                .as_ref()
                .map(|cb| cb(&prompt))
                .unwrap_or(false);
            if !confirmed {
                return Err(FleetError::Confirmation(format!("{key} key")));
            }
        }
        self.broadcast(
            &format!("Key {key}"),
            device::keyevent(key).into(),
            CommandOptions::default(),
        )
        .await
    }

    /// Vertical scroll sized to each device's own screen
    pub async fn scroll(&self, direction: ScrollDirection) -> Result<BatchReport> {
        let serials = self.targets()?;
        let sizes = Arc::new(self.resolutions(&serials).await);
        let source = CommandSource::per_device(move |serial| {
            let size = sizes.get(serial).copied().unwrap_or(FALLBACK_RESOLUTION);
            vec![device::scroll(direction, size.width, size.height)]
        });
        let intent = match direction {
            ScrollDirection::Up => "Scroll up",
            ScrollDirection::Down => "Scroll down",
        };
        Ok(self
            .pool
            .run_batch(intent, &source, &serials, CommandOptions::default())
            .await)
    }

    async fn resolutions(&self, serials: &[String]) -> HashMap<String, Resolution> {
        let token = self.ctx.token();
        let mut sizes = HashMap::new();
        for serial in serials {
            match self
                .registry
                .resolution(serial, self.runner(), &token)
                .await
            {
                Ok(size) => {
                    sizes.insert(serial.clone(), size);
                }
                Err(e) => warn!("No screen size for {}: {}", serial, e),
            }
        }
        sizes
    }

    /// Type the same text on every device
    pub async fn send_text(&self, text: &str, strategy: TextStrategy) -> Result<BatchReport> {
        info!("Sending {} characters of text", text.chars().count());
        let commands = text_commands(text, strategy);
        self.broadcast("Send text", CommandSource::Sequence(commands), text_options(strategy))
            .await
    }

    /// Type one randomly chosen line per device
    pub async fn send_random_lines(
        &self,
        lines: Vec<String>,
        strategy: TextStrategy,
    ) -> Result<BatchReport> {
        if lines.is_empty() {
            return Err(FleetError::Config("no text lines to choose from".to_string()));
        }
        let lines = Arc::new(lines);
        let source = CommandSource::per_device(move |_serial| {
            random_line(&lines)
                .map(|line| text_commands(line, strategy))
                .unwrap_or_default()
        });
        self.broadcast("Send random text", source, text_options(strategy))
            .await
    }

    pub async fn open_uri(&self, uri: &str, app: &str) -> Result<BatchReport> {
        let package = resolve_package(app);
        self.broadcast(
            &format!("Open {uri}"),
            device::view_uri(uri, &package).into(),
            CommandOptions::default(),
        )
        .await
    }

    /// Launch a known app by short name
    pub async fn launch(&self, app: &str) -> Result<BatchReport> {
        let target = get_app(app)
            .ok_or_else(|| FleetError::Config(format!("unknown app: {app}")))?;
        self.broadcast(
            &format!("Launch {app}"),
            device::start_activity(&target).into(),
            CommandOptions::default(),
        )
        .await
    }

    pub async fn force_stop(&self, app: &str) -> Result<BatchReport> {
        let package = resolve_package(app);
        self.broadcast(
            &format!("Force stop {package}"),
            device::force_stop(&package).into(),
            CommandOptions::default(),
        )
        .await
    }

    pub async fn share_link(&self, link: &str, app: &str) -> Result<BatchReport> {
        let package = resolve_package(app);
        self.broadcast(
            "Share link",
            device::share_text(link, &package).into(),
            CommandOptions::default(),
        )
        .await
    }

    pub async fn share_image(&self, file_name: &str, app: &str) -> Result<BatchReport> {
        let package = resolve_package(app);
        self.broadcast(
            &format!("Share image {file_name}"),
            device::share_image(file_name, &package).into(),
            CommandOptions::default(),
        )
        .await
    }

    /// Find `label` on every device and tap it
    pub async fn tap_element(&self, label: &str) -> Result<BatchReport> {
        let serials = self.targets()?;
        let operation = self.ctx.token();
        let mut handles = Vec::with_capacity(serials.len());
        for serial in &serials {
            let job_serial = serial.clone();
            let label = label.to_string();
            let handle = self
                .pool
                .spawn_job_under(&operation, move |runner, token| async move {
                    let (x, y) = ElementLocator::new(runner)
                        .tap(&job_serial, &label, &token)
                        .await?;
                    Ok(CommandOutput {
                        stdout: format!("({x}, {y})").into_bytes(),
                        stderr: String::new(),
                    })
                })
                .await;
            handles.push(DispatchHandle::new(serial.clone(), handle));
        }

        let outcomes = join_all(handles.into_iter().map(DispatchHandle::outcome)).await;
        let report = BatchReport {
            intent: format!("Tap {label:?}"),
            outcomes,
        };
        info!("{}", report);
        Ok(report)
    }

    /// Cancel all in-flight work and reset the pool
    pub async fn stop_all(&self) {
        self.pool.stop_all().await;
    }
}

fn text_options(strategy: TextStrategy) -> CommandOptions {
    let options = CommandOptions::default();
    match strategy {
        TextStrategy::PerCharacter => options.with_post_delay(TIMING_CONFIG.live.char_delay()),
        _ => options,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testing::FakeBridge;

    const LOGGING_BRIDGE: &str = r#"
if [ "$1" = "devices" ]; then
  printf 'List of devices attached\nd1\tdevice\nd2\tdevice\n'
  exit 0
fi
serial="$2"
shift 2
if [ "$1 $2" = "shell wm" ]; then echo "Physical size: 720x1600"; exit 0; fi
echo "$serial $@" >> "$FAKE_DIR/log"
"#;

    fn log(bridge: &FakeBridge) -> Vec<String> {
        let mut lines: Vec<String> = std::fs::read_to_string(bridge.dir().join("log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect();
        lines.sort();
        lines
    }

    #[tokio::test]
    async fn test_empty_set_refuses_batch() {
        let bridge = FakeBridge::new("exit 0");
        let fleet = Fleet::new(bridge.runner());
        assert!(matches!(fleet.tap(1, 1).await, Err(FleetError::NoDevices)));
    }

    #[tokio::test]
    async fn test_tap_broadcasts_to_all() {
        let bridge = FakeBridge::new(LOGGING_BRIDGE);
        let fleet = Fleet::new(bridge.runner());
        fleet.discover().await.unwrap();

        let report = fleet.tap(10, 20).await.unwrap();
        assert_eq!(report.to_string(), "Tap (10, 20): 2 succeeded, 0 failed");
        assert_eq!(
            log(&bridge),
            vec!["d1 shell input tap 10 20", "d2 shell input tap 10 20"]
        );
    }

    #[tokio::test]
    async fn test_power_requires_confirmation() {
        let bridge = FakeBridge::new(LOGGING_BRIDGE);
        let fleet = Fleet::new(bridge.runner());
        fleet.discover().await.unwrap();
        assert!(matches!(
            fleet.key(KeyCode::Power).await,
            Err(FleetError::Confirmation(_))
        ));
        assert!(log(&bridge).is_empty());

        let fleet = Fleet::new(bridge.runner()).with_confirmation(Box::new(|_| true));
        fleet.discover().await.unwrap();
        assert_eq!(fleet.key(KeyCode::Power).await.unwrap().succeeded(), 2);
    }

    #[tokio::test]
    async fn test_scroll_uses_device_size() {
        let bridge = FakeBridge::new(LOGGING_BRIDGE);
        let fleet = Fleet::new(bridge.runner());
        fleet.discover().await.unwrap();

        fleet.scroll(ScrollDirection::Down).await.unwrap();
        assert_eq!(
            log(&bridge)[0],
            "d1 shell input swipe 360 1200 360 400 300"
        );
    }

    #[tokio::test]
    async fn test_random_lines_pick_from_file_lines() {
        let bridge = FakeBridge::new(LOGGING_BRIDGE);
        let fleet = Fleet::new(bridge.runner());
        fleet.discover().await.unwrap();

        let report = fleet
            .send_random_lines(vec!["hello world".into(), "hi".into()], TextStrategy::WholeString)
            .await
            .unwrap();
        assert_eq!(report.succeeded(), 2);
        for line in log(&bridge) {
            assert!(
                line.ends_with("input text hello%sworld") || line.ends_with("input text hi"),
                "{line}"
            );
        }
    }

    #[tokio::test]
    async fn test_tap_element_reports_per_device() {
        let bridge = FakeBridge::new(
            r#"
if [ "$1" = "devices" ]; then
  printf 'List of devices attached\nd1\tdevice\nd2\tdevice\n'
  exit 0
fi
serial="$2"
shift 2
case "$1" in
  pull)
    if [ "$serial" = "d1" ]; then
      echo '<hierarchy><node text="Like" content-desc="" bounds="[0,0][20,40]" /></hierarchy>' > "$3"
    else
      echo '<hierarchy><node text="Other" content-desc="" bounds="[0,0][20,40]" /></hierarchy>' > "$3"
    fi ;;
esac
"#,
        );
        let fleet = Fleet::new(bridge.runner());
        fleet.discover().await.unwrap();

        let report = fleet.tap_element("Like").await.unwrap();
        let rows = report.rows();
        assert_eq!(rows[0], ("d1".to_string(), true, "(10, 20)".to_string()));
        assert!(!rows[1].1);
        assert_eq!(rows[1].2, "Element not found: Like");
    }

    #[tokio::test]
    async fn test_stop_all_from_signal_task_ends_in_flight_broadcast() {
        let bridge = FakeBridge::new(
            r#"
if [ "$1" = "devices" ]; then
  printf 'List of devices attached\nd1\tdevice\nd2\tdevice\n'
  exit 0
fi
exec sleep 30
"#,
        );
        let fleet = Arc::new(Fleet::new(bridge.runner()));
        fleet.discover().await.unwrap();

        let stopper = fleet.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            stopper.stop_all().await;
        });

        let report = tokio::time::timeout(std::time::Duration::from_secs(5), fleet.tap(1, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.outcomes.len(), 2);
        assert!(report
            .outcomes
            .iter()
            .all(|o| matches!(o.result, Err(FleetError::Cancelled))));
        assert!(!fleet.context().is_cancelled());
    }

    #[tokio::test]
    async fn test_launch_unknown_app() {
        let bridge = FakeBridge::new(LOGGING_BRIDGE);
        let fleet = Fleet::new(bridge.runner());
        fleet.discover().await.unwrap();
        assert!(matches!(
            fleet.launch("nope").await,
            Err(FleetError::Config(_))
        ));
        fleet.launch("fb-lite").await.unwrap();
        assert_eq!(
            log(&bridge)[0],
            "d1 shell am start -n com.facebook.lite/com.facebook.lite.MainActivity"
        );
    }
}
