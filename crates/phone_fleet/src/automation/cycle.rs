//! Account switching and posting across the fleet

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::accounts::AccountSet;
use super::state::{CycleReport, CycleState, PairRecord, Phase, Stage, SwitchRecord};
use crate::adb::{
    device, load_lines, random_line, text_commands, CommandRunner, DeviceCommand, TextStrategy,
};
use crate::config::{Affordance, AutomationConfig, PostPair, TIMING_CONFIG};
use crate::dispatch::{join_job, CommandOptions, CommandSource};
use crate::error::{FleetError, Result};
use crate::fleet::Fleet;
use crate::locator::ElementLocator;

/// Runs the multi-account posting cycle.
///
/// Within one device every step is sequential; devices run side by side
/// through the dispatch pool. Cancellation is checked before every step and
/// ends the run early with a report marked cancelled.
pub struct AutomationCycle {
    fleet: Arc<Fleet>,
    config: Arc<AutomationConfig>,
    captions: Arc<Vec<String>>,
    phase: watch::Sender<Phase>,
}

impl AutomationCycle {
    pub fn new(fleet: Arc<Fleet>, config: AutomationConfig) -> Result<Self> {
        config.validate()?;
        let captions = match &config.caption_file {
            Some(path) => load_lines(path)?,
            None => Vec::new(),
        };
        let (phase, _) = watch::channel(Phase::Idle);
        Ok(Self {
            fleet,
            config: Arc::new(config),
            captions: Arc::new(captions),
            phase,
        })
    }

    /// Follow phase changes
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    fn enter(&self, phase: Phase) {
        debug!("Automation phase: {}", phase);
        self.phase.send_replace(phase);
    }

    pub async fn run(&self) -> Result<CycleReport> {
        let run_id = Uuid::new_v4();
        let token = self.fleet.context().token();
        let mut state = CycleState::new();

        self.enter(Phase::Setup);
        info!("Automation run {} starting", run_id);

        let targets = match self.fleet.targets() {
            Ok(targets) => targets,
            Err(e) => {
                self.enter(Phase::Idle);
                return Err(e);
            }
        };
        let devices = self.responsive(&targets).await;
        if devices.is_empty() {
            self.enter(Phase::Idle);
            return Err(FleetError::NoDevices);
        }

        let outcome = self.run_phases(&devices, &token, &mut state).await;
        self.enter(Phase::Idle);

        match outcome {
            Ok(()) => {}
            Err(FleetError::Cancelled) => {
                info!("Automation run {} cancelled", run_id);
                state.cancelled = true;
            }
            Err(e) => return Err(e),
        }

        let report = state.into_report(run_id, devices);
        info!("{}", report);
        Ok(report)
    }

    async fn run_phases(
        &self,
        devices: &[String],
        token: &CancellationToken,
        state: &mut CycleState,
    ) -> Result<()> {
        let accounts = AccountSet::load(&self.config.accounts_dir, devices);
        let pair_count = self.config.posts.len();

        if self.config.initial_share {
            for pair in 0..pair_count {
                check(token)?;
                self.enter(Phase::InitialShare { pair });
                let record = self
                    .post_round(Stage::InitialShare, pair, devices, token)
                    .await;
                state.record_pair(record);
                check(token)?;
                self.cooldown(token).await?;
            }
        }

        for index in 0..accounts.max_len() {
            check(token)?;
            let candidates: Vec<String> = accounts
                .serials_at(index)
                .into_iter()
                .filter(|s| devices.contains(s))
                .collect();
            if candidates.is_empty() {
                break;
            }

            self.enter(Phase::Switch { index });
            let switch = self
                .switch_round(index, &candidates, &accounts, token)
                .await;
            let switched = switch.switched.clone();
            state.record_switch(switch);
            check(token)?;

            if switched.is_empty() {
                warn!("No device switched to account #{}", index + 1);
                continue;
            }

            for pair in 0..pair_count {
                check(token)?;
                self.enter(Phase::Post { index, pair });
                let record = self
                    .post_round(Stage::Account(index), pair, &switched, token)
                    .await;
                state.record_pair(record);
                check(token)?;
                self.cooldown(token).await?;
            }
        }
        Ok(())
    }

    /// Devices whose `get-state` answers `device`
    async fn responsive(&self, targets: &[String]) -> Vec<String> {
        let report = self
            .fleet
            .pool()
            .run_batch(
                "Responsiveness check",
                &CommandSource::Single(device::get_state()),
                targets,
                CommandOptions::default().with_timeout(TIMING_CONFIG.command.discovery()),
            )
            .await;
        report
            .outcomes
            .iter()
            .filter(|o| o.success() && o.message() == "device")
            .map(|o| o.serial.clone())
            .collect()
    }

    async fn switch_round(
        &self,
        index: usize,
        serials: &[String],
        accounts: &AccountSet,
        token: &CancellationToken,
    ) -> SwitchRecord {
        let mut jobs = Vec::with_capacity(serials.len());
        for serial in serials {
            let account = accounts.account_at(serial, index).unwrap_or_default().to_string();
            let config = self.config.clone();
            let job_serial = serial.clone();
            let handle = self
                .fleet
                .pool()
                .spawn_job_under(token, move |runner, token| async move {
                    switch_account(&runner, &token, &job_serial, &account, &config).await
                })
                .await;
            jobs.push((serial.clone(), handle));
        }

        let mut record = SwitchRecord {
            index,
            switched: Vec::new(),
            failures: Vec::new(),
        };
        let results = join_all(jobs.into_iter().map(|(serial, handle)| async move {
            (serial, join_job(handle).await)
        }))
        .await;
        for (serial, result) in results {
            match result {
                Ok(()) => record.switched.push(serial),
                Err(e) => {
                    if !e.is_cancelled() {
                        warn!("Switch to account #{} failed on {}: {}", index + 1, serial, e);
                    }
                    record.failures.push((serial, e.to_string()));
                }
            }
        }
        record
    }

    async fn post_round(
        &self,
        stage: Stage,
        pair: usize,
        serials: &[String],
        token: &CancellationToken,
    ) -> PairRecord {
        let mut jobs = Vec::with_capacity(serials.len());
        for serial in serials {
            let post = self.pair_for_device(pair);
            let config = self.config.clone();
            let job_serial = serial.clone();
            let handle = self
                .fleet
                .pool()
                .spawn_job_under(token, move |runner, token| async move {
                    post_pair(&runner, &token, &job_serial, &post, &config).await
                })
                .await;
            jobs.push((serial.clone(), handle));
        }

        let mut record = PairRecord {
            stage,
            pair,
            posted: Vec::new(),
            failures: Vec::new(),
        };
        let results = join_all(jobs.into_iter().map(|(serial, handle)| async move {
            (serial, join_job(handle).await)
        }))
        .await;
        for (serial, result) in results {
            match result {
                Ok(()) => record.posted.push(serial),
                Err(e) => {
                    if !e.is_cancelled() {
                        warn!("Posting pair {} failed on {}: {}", pair + 1, serial, e);
                    }
                    record.failures.push((serial, e.to_string()));
                }
            }
        }
        record
    }

    /// The configured pair, with a random caption line when it has none of its own
    fn pair_for_device(&self, pair: usize) -> PostPair {
        let mut post = self.config.posts[pair].clone();
        if post.caption.is_none() {
            post.caption = random_line(&self.captions).cloned();
        }
        post
    }

    async fn cooldown(&self, token: &CancellationToken) -> Result<()> {
        let cooldown = self.config.cooldown();
        if cooldown.is_zero() {
            return Ok(());
        }
        self.enter(Phase::Cooldown);
        pause(token, cooldown).await
    }
}

fn check(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        Err(FleetError::Cancelled)
    } else {
        Ok(())
    }
}

async fn pause(token: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = token.cancelled() => Err(FleetError::Cancelled),
    }
}

async fn run_args(
    runner: &CommandRunner,
    token: &CancellationToken,
    serial: &str,
    args: Vec<String>,
) -> Result<()> {
    runner.run(&DeviceCommand::new(serial, args), token).await?;
    Ok(())
}

async fn tap_affordance(
    runner: &CommandRunner,
    locator: &ElementLocator,
    token: &CancellationToken,
    serial: &str,
    affordance: &Affordance,
) -> Result<()> {
    match affordance {
        Affordance::Point { x, y } => run_args(runner, token, serial, device::tap(*x, *y)).await,
        Affordance::Element { label } => locator.tap(serial, label, token).await.map(|_| ()),
    }
}

async fn switch_account(
    runner: &CommandRunner,
    token: &CancellationToken,
    serial: &str,
    account: &str,
    config: &AutomationConfig,
) -> Result<()> {
    let locator =
        ElementLocator::new(runner.clone()).with_scroll(config.scroll, config.scroll_attempts);

    check(token)?;
    tap_affordance(runner, &locator, token, serial, &config.account_menu).await?;
    check(token)?;
    run_args(runner, token, serial, config.reveal_accounts.args()).await?;
    check(token)?;
    tap_affordance(runner, &locator, token, serial, &config.switch_account).await?;
    check(token)?;
    locator.tap(serial, account, token).await?;
    pause(token, config.settle_delay()).await?;

    info!("{} switched to {}", serial, account);
    Ok(())
}

async fn post_pair(
    runner: &CommandRunner,
    token: &CancellationToken,
    serial: &str,
    post: &PostPair,
    config: &AutomationConfig,
) -> Result<()> {
    let locator =
        ElementLocator::new(runner.clone()).with_scroll(config.scroll, config.scroll_attempts);

    check(token)?;
    run_args(
        runner,
        token,
        serial,
        device::share_text(&post.link, &config.app_package),
    )
    .await?;
    pause(token, config.settle_delay()).await?;

    let mut attempt = 1;
    loop {
        check(token)?;
        match finish_post(runner, &locator, token, serial, post, config).await {
            Ok(()) => break,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) if attempt < config.post_retries => {
                let backoff = config.retry_backoff(attempt);
                debug!(
                    "Post attempt {} failed on {}: {}; retrying in {:?}",
                    attempt, serial, e, backoff
                );
                pause(token, backoff).await?;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }

    pause(token, config.settle_delay()).await?;
    info!("{} posted {}", serial, post.link);
    Ok(())
}

/// Type the caption if there is one, then press post
async fn finish_post(
    runner: &CommandRunner,
    locator: &ElementLocator,
    token: &CancellationToken,
    serial: &str,
    post: &PostPair,
    config: &AutomationConfig,
) -> Result<()> {
    if let Some(caption) = &post.caption {
        debug!("Typing a {}-character caption on {}", caption.chars().count(), serial);
        let pacing = match config.text_strategy {
            TextStrategy::PerCharacter => TIMING_CONFIG.live.char_delay(),
            _ => Duration::ZERO,
        };
        for args in text_commands(caption, config.text_strategy) {
            check(token)?;
            let command = DeviceCommand::new(serial, args).with_post_delay(pacing);
            runner.run(&command, token).await?;
        }
    }
    check(token)?;
    tap_affordance(runner, locator, token, serial, &config.post_button).await
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::SwipeSpec;
    use crate::testing::FakeBridge;
    use std::time::Instant;

    /// d1..d3 are attached. `get-state` answers `device` except for a serial
    /// listed in `$FAKE_DIR/asleep`; share intents fail on serials listed in
    /// `$FAKE_DIR/broken`. Typing hangs for serials in `hang`, always fails
    /// for `mute` and fails once for `flaky`. The UI dump lists every account
    /// name.
    const BRIDGE: &str = r#"
if [ "$1" = "devices" ]; then
  printf 'List of devices attached\nd1\tdevice\nd2\tdevice\nd3\tdevice\n'
  exit 0
fi
serial="$2"
shift 2
echo "$serial $@" >> "$FAKE_DIR/log"
case "$1" in
  get-state)
    if grep -qx "$serial" "$FAKE_DIR/asleep" 2>/dev/null; then echo "offline"; else echo "device"; fi ;;
  pull)
    cat > "$3" <<'XML'
<hierarchy><node text="" content-desc="" bounds="[0,0][1080,2400]"><node text="alice" content-desc="" bounds="[0,100][200,200]" /><node text="bob" content-desc="" bounds="[0,200][200,300]" /><node text="carol" content-desc="" bounds="[0,300][200,400]" /></node></hierarchy>
XML
    ;;
  shell)
    if [ "$3" = "start" ] && grep -qx "$serial" "$FAKE_DIR/broken" 2>/dev/null; then
      echo "Error: Activity not started" >&2; exit 1
    fi
    if [ "$2 $3" = "input text" ]; then
      if grep -qx "$serial" "$FAKE_DIR/hang" 2>/dev/null; then exec sleep 30; fi
      if grep -qx "$serial" "$FAKE_DIR/mute" 2>/dev/null; then
        echo "input rejected" >&2; exit 1
      fi
      if grep -qx "$serial" "$FAKE_DIR/flaky" 2>/dev/null && [ ! -e "$FAKE_DIR/flaked_$serial" ]; then
        touch "$FAKE_DIR/flaked_$serial"; echo "input rejected" >&2; exit 1
      fi
    fi ;;
esac
"#;

    fn setup(broken: &[&str], asleep: &[&str]) -> (FakeBridge, AutomationConfig) {
        let bridge = FakeBridge::new(BRIDGE);
        let dir = bridge.dir();
        std::fs::write(dir.join("broken"), broken.join("\n")).unwrap();
        std::fs::write(dir.join("asleep"), asleep.join("\n")).unwrap();

        let accounts = dir.join("accounts");
        std::fs::create_dir(&accounts).unwrap();
        std::fs::write(accounts.join("d1.txt"), "alice\nbob\n").unwrap();
        std::fs::write(accounts.join("d2.txt"), "carol\n").unwrap();

        let config = AutomationConfig {
            accounts_dir: accounts,
            posts: vec![PostPair {
                link: "https://example.com/p/1".into(),
                caption: Some("nice one".into()),
            }],
            account_menu: Affordance::Point { x: 1000, y: 100 },
            switch_account: Affordance::Point { x: 540, y: 2000 },
            post_button: Affordance::Point { x: 980, y: 150 },
            scroll: SwipeSpec::default(),
            settle_delay_secs: 0.0,
            cooldown_secs: 0.0,
            retry_backoff_secs: 0.0,
            post_retries: 2,
            ..AutomationConfig::default()
        };
        (bridge, config)
    }

    async fn fleet(bridge: &FakeBridge) -> Arc<Fleet> {
        let fleet = Arc::new(Fleet::new(bridge.runner()));
        fleet.discover().await.unwrap();
        fleet
    }

    fn log(bridge: &FakeBridge) -> Vec<String> {
        std::fs::read_to_string(bridge.dir().join("log"))
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[tokio::test]
    async fn test_partial_failure_still_counts_pair() {
        let (bridge, config) = setup(&["d3"], &[]);
        let cycle = AutomationCycle::new(fleet(&bridge).await, config).unwrap();

        let report = cycle.run().await.unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.devices, vec!["d1", "d2", "d3"]);
        // initial share, account #1 (d1, d2), account #2 (d1)
        assert_eq!(report.pairs.len(), 3);
        assert!(report.pairs.iter().all(PairRecord::success));

        let initial = &report.pairs[0];
        assert_eq!(initial.stage, Stage::InitialShare);
        let mut posted = initial.posted.clone();
        posted.sort();
        assert_eq!(posted, vec!["d1", "d2"]);
        assert_eq!(initial.failures.len(), 1);
        assert_eq!(initial.failures[0].0, "d3");
        assert!(initial.failures[0].1.contains("Activity not started"));

        assert_eq!(report.switches.len(), 2);
        assert_eq!(report.pairs[2].posted, vec!["d1"]);
        assert_eq!(cycle.phase(), Phase::Idle);

        let log = log(&bridge);
        assert!(log.contains(&"d1 shell input tap 100 150".to_string()));
        assert!(log.contains(&"d1 shell input tap 100 250".to_string()));
        assert!(log.contains(&"d2 shell input tap 100 350".to_string()));
        assert!(log.contains(&"d1 shell input text nice%sone".to_string()));
    }

    #[tokio::test]
    async fn test_unresponsive_device_is_left_out() {
        let (bridge, mut config) = setup(&[], &["d2"]);
        config.initial_share = false;
        let cycle = AutomationCycle::new(fleet(&bridge).await, config).unwrap();

        let report = cycle.run().await.unwrap();

        assert_eq!(report.devices, vec!["d1", "d3"]);
        assert_eq!(report.switches[0].switched, vec!["d1"]);
        assert!(!log(&bridge).iter().any(|l| l.starts_with("d2 shell")));
    }

    #[tokio::test]
    async fn test_failed_switch_skips_post_for_that_device() {
        let (bridge, mut config) = setup(&[], &[]);
        config.initial_share = false;
        std::fs::write(config.accounts_dir.join("d2.txt"), "nobody\n").unwrap();
        config.scroll_attempts = 1;
        let cycle = AutomationCycle::new(fleet(&bridge).await, config).unwrap();

        let report = cycle.run().await.unwrap();

        let first = &report.switches[0];
        assert_eq!(first.switched, vec!["d1"]);
        assert_eq!(first.failures[0].0, "d2");
        assert_eq!(report.pairs[0].posted, vec!["d1"]);
        assert!(report.pairs[0].failures.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_unwinds_to_idle() {
        let (bridge, mut config) = setup(&[], &[]);
        config.cooldown_secs = 30.0;
        let fleet = fleet(&bridge).await;
        let cycle = AutomationCycle::new(fleet.clone(), config).unwrap();
        let mut phases = cycle.subscribe();

        let canceller = fleet.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.context().cancel();
        });

        let started = Instant::now();
        let report = cycle.run().await.unwrap();

        assert!(report.cancelled);
        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(report.pairs.len(), 1);
        assert_eq!(*phases.borrow_and_update(), Phase::Idle);
    }

    fn text_attempts(bridge: &FakeBridge, serial: &str) -> usize {
        let prefix = format!("{serial} shell input text");
        log(bridge).iter().filter(|l| l.starts_with(&prefix)).count()
    }

    #[tokio::test]
    async fn test_post_retries_after_failed_caption() {
        let (bridge, mut config) = setup(&[], &[]);
        config.initial_share = false;
        config.post_retries = 3;
        std::fs::write(bridge.dir().join("flaky"), "d1\n").unwrap();
        std::fs::write(bridge.dir().join("mute"), "d2\n").unwrap();
        let cycle = AutomationCycle::new(fleet(&bridge).await, config).unwrap();

        let report = cycle.run().await.unwrap();

        let first = &report.pairs[0];
        assert_eq!(first.stage, Stage::Account(0));
        assert_eq!(first.posted, vec!["d1"]);
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.failures[0].0, "d2");
        assert!(first.failures[0].1.contains("input rejected"));
        assert!(first.success());

        // d1: one failure then success on account #1, clean on account #2
        assert_eq!(text_attempts(&bridge, "d1"), 3);
        // d2 uses up every attempt
        assert_eq!(text_attempts(&bridge, "d2"), 3);
        // the post button is only pressed after a caption went through
        let d2_post_taps = log(&bridge)
            .iter()
            .filter(|l| *l == "d2 shell input tap 980 150")
            .count();
        assert_eq!(d2_post_taps, 0);
    }

    #[tokio::test]
    async fn test_cancelled_attempt_is_not_retried() {
        let (bridge, mut config) = setup(&[], &[]);
        config.post_retries = 3;
        std::fs::write(bridge.dir().join("hang"), "d1\n").unwrap();
        let fleet = fleet(&bridge).await;
        let cycle = AutomationCycle::new(fleet.clone(), config).unwrap();

        let canceller = fleet.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.context().cancel();
        });

        let report = cycle.run().await.unwrap();

        assert!(report.cancelled);
        let initial = &report.pairs[0];
        assert_eq!(initial.stage, Stage::InitialShare);
        let d1 = initial.failures.iter().find(|(s, _)| s == "d1").unwrap();
        assert_eq!(d1.1, "cancelled");
        assert_eq!(text_attempts(&bridge, "d1"), 1);
    }

    #[tokio::test]
    async fn test_no_devices() {
        let bridge = FakeBridge::new("exit 0");
        let fleet = Arc::new(Fleet::new(bridge.runner()));
        let (_, config) = setup(&[], &[]);
        let cycle = AutomationCycle::new(fleet, config).unwrap();
        assert!(matches!(cycle.run().await, Err(FleetError::NoDevices)));
    }
}
