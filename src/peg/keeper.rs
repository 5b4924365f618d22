//! Peg keeper loop.
//!
//! Drives the controller one cycle at a time. Between cycles it enforces
//! the cooldown, stops after too many consecutive failing cycles, checks
//! the resource guard, and polls the kill switch. All of these are
//! evaluated only at the top of an iteration, never in the middle of a
//! trade.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::address::Address;
use crate::core::context::BlockContext;
use crate::core::token::TokenLedger;
use crate::error::{Error, Result};
use crate::peg::controller::{CycleReport, PegController};
use crate::protocol::engine::Protocol;
use crate::utils::constants::{DEFAULT_COOLDOWN_SECS, DEFAULT_MAX_FAILURE_STREAK};

// ═══════════════════════════════════════════════════════════════════════════════
// KILL SWITCH
// ═══════════════════════════════════════════════════════════════════════════════

/// Externally controlled stop signal
pub trait KillSwitch: Send + Sync + std::fmt::Debug {
    /// Whether the loop must stop
    fn is_engaged(&self) -> bool;
}

/// In-process kill switch; clones share the flag
#[derive(Debug, Clone, Default)]
pub struct AtomicKillSwitch {
    flag: Arc<AtomicBool>,
}

impl AtomicKillSwitch {
    /// Create a released switch
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop
    pub fn engage(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Clear a stop request
    pub fn release(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl KillSwitch for AtomicKillSwitch {
    fn is_engaged(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Engaged while a file exists at `path`
#[derive(Debug, Clone)]
pub struct FileKillSwitch {
    path: PathBuf,
}

impl FileKillSwitch {
    /// Watch `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KillSwitch for FileKillSwitch {
    fn is_engaged(&self) -> bool {
        self.path.exists()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESOURCE GUARD
// ═══════════════════════════════════════════════════════════════════════════════

/// Reaction to a low balance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardMode {
    /// Stop the loop
    HardStop,
    /// Log and keep going
    WarnAndContinue,
}

/// Minimum balance the operator must keep of one token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceGuard {
    /// Token watched
    pub token: Address,
    /// Balance below which the guard fires
    pub min_balance: u128,
    /// What to do when it fires
    pub mode: GuardMode,
}

/// Result of a guard check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// Balance is sufficient
    Healthy,
    /// Balance is low but the loop continues
    Warn {
        /// Observed balance
        balance: u128,
    },
    /// Balance is low and the loop stops
    Stop {
        /// Observed balance
        balance: u128,
    },
}

impl ResourceGuard {
    /// Check `account`'s balance
    pub fn check(&self, ledger: &TokenLedger, account: &Address) -> GuardVerdict {
        let balance = ledger.balance_of(&self.token, account);
        if balance >= self.min_balance {
            return GuardVerdict::Healthy;
        }
        match self.mode {
            GuardMode::HardStop => GuardVerdict::Stop { balance },
            GuardMode::WarnAndContinue => GuardVerdict::Warn { balance },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEEPER
// ═══════════════════════════════════════════════════════════════════════════════

/// Loop parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeeperSettings {
    /// Minimum seconds between the end of one cycle and the next
    pub cooldown_secs: u64,
    /// Consecutive failing cycles before a hard stop
    pub max_failure_streak: u32,
    /// Stop after this many cycles
    pub max_cycles: Option<u64>,
    /// Wall-clock pause between iterations of the async loop
    pub poll_interval_ms: u64,
    /// Balance guard
    pub guard: Option<ResourceGuard>,
}

impl Default for KeeperSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: DEFAULT_COOLDOWN_SECS,
            max_failure_streak: DEFAULT_MAX_FAILURE_STREAK,
            max_cycles: None,
            poll_interval_ms: 1_000,
            guard: None,
        }
    }
}

impl KeeperSettings {
    /// Validate loop parameters
    pub fn validate(&self) -> Result<()> {
        if self.max_failure_streak == 0 {
            return Err(Error::InvalidParameter {
                name: "max_failure_streak".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

/// Why the loop stopped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Kill switch engaged
    KillSwitch,
    /// Too many consecutive failing cycles
    FailureStreak {
        /// Streak reached
        streak: u32,
    },
    /// Resource guard in hard-stop mode fired
    ResourceGuard {
        /// Observed balance
        balance: u128,
        /// Required balance
        min_balance: u128,
    },
    /// Configured cycle count reached
    MaxCycles {
        /// Cycles run
        cycles: u64,
    },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::KillSwitch => write!(f, "kill switch engaged"),
            StopReason::FailureStreak { streak } => {
                write!(f, "{} consecutive failing cycles", streak)
            }
            StopReason::ResourceGuard {
                balance,
                min_balance,
            } => write!(f, "balance {} below guard {}", balance, min_balance),
            StopReason::MaxCycles { cycles } => write!(f, "completed {} cycles", cycles),
        }
    }
}

/// Result of one loop iteration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// A cycle ran to completion
    Ran(CycleReport),
    /// Strict mode aborted the cycle
    Aborted(Error),
    /// Too soon after the previous cycle
    CoolingDown {
        /// Seconds left
        remaining_secs: u64,
    },
    /// The loop must not continue
    Stopped(StopReason),
}

/// Cross-cycle state private to the loop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopState {
    /// Timestamp the previous cycle ended at
    pub last_cycle_end: Option<u64>,
    /// Consecutive cycles with at least one failure
    pub failure_streak: u32,
    /// Cycles run
    pub cycles: u64,
}

/// Sequential scheduler around a [`PegController`]
#[derive(Debug)]
pub struct PegKeeper {
    controller: PegController,
    settings: KeeperSettings,
    state: LoopState,
    kill_switch: Box<dyn KillSwitch>,
}

impl PegKeeper {
    /// Create a keeper polling `kill_switch`
    pub fn new(
        controller: PegController,
        settings: KeeperSettings,
        kill_switch: Box<dyn KillSwitch>,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            controller,
            settings,
            state: LoopState::default(),
            kill_switch,
        })
    }

    /// Loop state
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Controller
    pub fn controller(&self) -> &PegController {
        &self.controller
    }

    /// Settings
    pub fn settings(&self) -> &KeeperSettings {
        &self.settings
    }

    /// Run at most one cycle at `ctx`
    pub fn tick(&mut self, protocol: &mut Protocol, ctx: &BlockContext) -> TickOutcome {
        if let Some(reason) = self.stop_reason(protocol) {
            return TickOutcome::Stopped(reason);
        }
        if let Some(last) = self.state.last_cycle_end {
            let ready_at = last.saturating_add(self.settings.cooldown_secs);
            if ctx.timestamp < ready_at {
                return TickOutcome::CoolingDown {
                    remaining_secs: ready_at - ctx.timestamp,
                };
            }
        }

        let outcome = match self.controller.run_cycle(protocol, ctx) {
            Ok(report) => {
                if report.failed() > 0 {
                    self.state.failure_streak += 1;
                } else {
                    self.state.failure_streak = 0;
                }
                TickOutcome::Ran(report)
            }
            Err(err) => {
                self.state.failure_streak += 1;
                TickOutcome::Aborted(err)
            }
        };
        self.state.last_cycle_end = Some(ctx.timestamp);
        self.state.cycles += 1;
        if self.state.failure_streak > 0 {
            tracing::warn!(streak = self.state.failure_streak, "cycle had failures");
        }
        outcome
    }

    fn stop_reason(&self, protocol: &Protocol) -> Option<StopReason> {
        if self.kill_switch.is_engaged() {
            return Some(StopReason::KillSwitch);
        }
        if self.state.failure_streak >= self.settings.max_failure_streak {
            return Some(StopReason::FailureStreak {
                streak: self.state.failure_streak,
            });
        }
        if let Some(max) = self.settings.max_cycles {
            if self.state.cycles >= max {
                return Some(StopReason::MaxCycles {
                    cycles: self.state.cycles,
                });
            }
        }
        if let Some(guard) = &self.settings.guard {
            match guard.check(protocol.ledger(), &self.controller.operator()) {
                GuardVerdict::Healthy => {}
                GuardVerdict::Warn { balance } => {
                    tracing::warn!(balance, min = guard.min_balance, "operator balance below guard");
                }
                GuardVerdict::Stop { balance } => {
                    return Some(StopReason::ResourceGuard {
                        balance,
                        min_balance: guard.min_balance,
                    });
                }
            }
        }
        None
    }

    /// Run until a stop condition; `next_ctx` supplies the block context for each iteration
    pub async fn run<F>(&mut self, protocol: &mut Protocol, next_ctx: F) -> StopReason
    where
        F: FnMut() -> BlockContext,
    {
        self.run_observed(protocol, next_ctx, |_, _| {}).await
    }

    /// [`run`](Self::run), handing every tick's context and outcome to `observe`
    pub async fn run_observed<F, O>(
        &mut self,
        protocol: &mut Protocol,
        mut next_ctx: F,
        mut observe: O,
    ) -> StopReason
    where
        F: FnMut() -> BlockContext,
        O: FnMut(&BlockContext, &TickOutcome),
    {
        let pause = Duration::from_millis(self.settings.poll_interval_ms);
        loop {
            let ctx = next_ctx();
            let outcome = self.tick(protocol, &ctx);
            observe(&ctx, &outcome);
            match outcome {
                TickOutcome::Stopped(reason) => {
                    match &reason {
                        StopReason::MaxCycles { .. } => tracing::info!(%reason, "keeper stopped"),
                        _ => tracing::error!(%reason, "keeper stopped"),
                    }
                    return reason;
                }
                TickOutcome::Aborted(err) => {
                    tracing::error!(error = %err, cycle = self.state.cycles, "cycle aborted");
                }
                TickOutcome::CoolingDown { remaining_secs } => {
                    tracing::debug!(remaining_secs, "cooling down");
                }
                TickOutcome::Ran(_) => {}
            }
            tokio::time::sleep(pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{EngineConfig, PegControllerConfig, PegTarget};
    use crate::oracle::PriceFeed;
    use crate::utils::constants::WAD;

    fn setup(stable: u128) -> (Protocol, Address, Address) {
        let gov = Address::from_label("gov");
        let musd = Address::from_label("musd");
        let weth = Address::from_label("weth");
        let mut protocol =
            Protocol::new(&EngineConfig::default(), gov, musd, Arc::new(PriceFeed::new())).unwrap();
        let lp = BlockContext::new(1, 1_000, Address::from_label("lp"));
        protocol.ledger_mut().mint(weth, lp.caller, 100_000 * WAD).unwrap();
        protocol.ledger_mut().mint(musd, lp.caller, 100_000 * WAD).unwrap();
        protocol
            .add_liquidity(&lp, weth, musd, 10_000 * WAD, stable * WAD, 0, 0, 2_000)
            .unwrap();
        (protocol, weth, Address::from_label("keeper"))
    }

    fn keeper(
        operator: Address,
        targets: Vec<PegTarget>,
        settings: KeeperSettings,
        kill: Box<dyn KillSwitch>,
    ) -> PegKeeper {
        let config = PegControllerConfig {
            targets,
            ..Default::default()
        };
        PegKeeper::new(PegController::new(config, operator).unwrap(), settings, kill).unwrap()
    }

    #[test]
    fn test_cooldown_between_cycles() {
        let (mut protocol, weth, operator) = setup(10_000);
        let mut k = keeper(
            operator,
            vec![PegTarget::new("WETH", weth, WAD)],
            KeeperSettings { cooldown_secs: 30, ..Default::default() },
            Box::new(AtomicKillSwitch::new()),
        );
        let ctx = BlockContext::new(2, 1_000, operator);
        assert!(matches!(k.tick(&mut protocol, &ctx), TickOutcome::Ran(_)));
        assert_eq!(
            k.tick(&mut protocol, &ctx.advance(1, 10)),
            TickOutcome::CoolingDown { remaining_secs: 20 }
        );
        assert!(matches!(k.tick(&mut protocol, &ctx.advance(2, 30)), TickOutcome::Ran(_)));
        assert_eq!(k.state().cycles, 2);
    }

    #[test]
    fn test_kill_switch_checked_first() {
        let (mut protocol, weth, operator) = setup(10_000);
        let kill = AtomicKillSwitch::new();
        let mut k = keeper(
            operator,
            vec![PegTarget::new("WETH", weth, WAD)],
            KeeperSettings::default(),
            Box::new(kill.clone()),
        );
        kill.engage();
        let ctx = BlockContext::new(2, 1_000, operator);
        assert_eq!(k.tick(&mut protocol, &ctx), TickOutcome::Stopped(StopReason::KillSwitch));
        kill.release();
        assert!(matches!(k.tick(&mut protocol, &ctx), TickOutcome::Ran(_)));
    }

    #[test]
    fn test_file_kill_switch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("STOP");
        let kill = FileKillSwitch::new(&path);
        assert!(!kill.is_engaged());
        std::fs::write(&path, b"").unwrap();
        assert!(kill.is_engaged());
    }

    #[test]
    fn test_failure_streak_hard_stop() {
        let (mut protocol, _, operator) = setup(10_000);
        let missing = PegTarget::new("DAI", Address::from_label("dai"), WAD);
        let mut k = keeper(
            operator,
            vec![missing],
            KeeperSettings { cooldown_secs: 0, max_failure_streak: 2, ..Default::default() },
            Box::new(AtomicKillSwitch::new()),
        );
        let ctx = BlockContext::new(2, 1_000, operator);
        assert!(matches!(k.tick(&mut protocol, &ctx), TickOutcome::Ran(r) if r.failed() == 1));
        assert!(matches!(k.tick(&mut protocol, &ctx), TickOutcome::Ran(_)));
        assert_eq!(
            k.tick(&mut protocol, &ctx),
            TickOutcome::Stopped(StopReason::FailureStreak { streak: 2 })
        );
    }

    #[test]
    fn test_resource_guard_modes() {
        let (mut protocol, weth, operator) = setup(10_000);
        let guard = ResourceGuard {
            token: weth,
            min_balance: WAD,
            mode: GuardMode::WarnAndContinue,
        };
        let mut warn = keeper(
            operator,
            Vec::new(),
            KeeperSettings { guard: Some(guard), ..Default::default() },
            Box::new(AtomicKillSwitch::new()),
        );
        let ctx = BlockContext::new(2, 1_000, operator);
        assert!(matches!(warn.tick(&mut protocol, &ctx), TickOutcome::Ran(_)));

        let mut stop = keeper(
            operator,
            Vec::new(),
            KeeperSettings {
                guard: Some(ResourceGuard { mode: GuardMode::HardStop, ..guard }),
                ..Default::default()
            },
            Box::new(AtomicKillSwitch::new()),
        );
        assert_eq!(
            stop.tick(&mut protocol, &ctx),
            TickOutcome::Stopped(StopReason::ResourceGuard { balance: 0, min_balance: WAD })
        );
    }

    #[tokio::test]
    async fn test_run_stops_after_max_cycles() {
        let (mut protocol, weth, operator) = setup(10_500);
        protocol.ledger_mut().mint(weth, operator, 10_000 * WAD).unwrap();
        let mut k = keeper(
            operator,
            vec![PegTarget::new("WETH", weth, WAD)],
            KeeperSettings {
                cooldown_secs: 12,
                max_cycles: Some(3),
                poll_interval_ms: 1,
                ..Default::default()
            },
            Box::new(AtomicKillSwitch::new()),
        );

        let mut block = 1u64;
        let reason = k
            .run(&mut protocol, || {
                block += 1;
                BlockContext::new(block, 1_000 + block * 12, operator)
            })
            .await;
        assert_eq!(reason, StopReason::MaxCycles { cycles: 3 });

        let state = k.controller().pool_state(&protocol, &k.controller().config().targets[0]).unwrap();
        assert!(state.implied_price().unwrap() < 105 * WAD / 100);
        assert_eq!(k.state().cycles, 3);
    }

    #[tokio::test]
    async fn test_run_observed_sees_every_tick() {
        let (mut protocol, weth, operator) = setup(10_000);
        let mut k = keeper(
            operator,
            vec![PegTarget::new("WETH", weth, WAD)],
            KeeperSettings {
                cooldown_secs: 20,
                max_cycles: Some(2),
                poll_interval_ms: 0,
                ..Default::default()
            },
            Box::new(AtomicKillSwitch::new()),
        );

        let mut block = 1u64;
        let mut seen = Vec::new();
        let reason = k
            .run_observed(
                &mut protocol,
                || {
                    block += 1;
                    BlockContext::new(block, 1_000 + block * 12, operator)
                },
                |ctx, outcome| seen.push((ctx.block_number, outcome.clone())),
            )
            .await;
        assert_eq!(reason, StopReason::MaxCycles { cycles: 2 });
        // ran, cooling down, ran, stopped
        assert_eq!(seen.len(), 4);
        assert!(matches!(seen[0].1, TickOutcome::Ran(_)));
        assert_eq!(seen[1].1, TickOutcome::CoolingDown { remaining_secs: 8 });
        assert!(matches!(seen[2].1, TickOutcome::Ran(_)));
        assert!(matches!(seen[3].1, TickOutcome::Stopped(_)));
    }
}
