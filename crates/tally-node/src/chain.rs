//! Block execution.
//!
//! [`Chain`] owns the committed store and runs one block at a time:
//!
//! 1. open a [`BlockCache`] over the committed store;
//! 2. advance every epoch (subscribers fire here, before anything else)
//!    and drop activity that closed windows have consumed;
//! 3. deliver the block's transactions, each in its own nested cache so a
//!    rejected transaction leaves no trace;
//! 4. sweep expired shares on the configured interval;
//! 5. record the height and commit.
//!
//! Any fatal error drops the block cache, leaving the committed store at
//! the previous height.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_epoch::genesis;
use tally_epoch::{EpochError, EpochHookDispatcher, EpochHooks, EpochTracker, EpochTransition};
use tally_reward::claims::SweepSummary;
use tally_reward::{
    ActionRegistry, ActivityLog, ClaimLedger, LedgerBank, RewardDistributionEngine, RewardError,
};
use tally_store::{codec, keys, BlockCache, Context, KvStore, StoreError};
use tally_types::{Address, Coin, EpochInfo, EpochNumber, Event, Height, ProgramId, RewardProgram};

use crate::config::NodeConfig;

const HEIGHT_META: &str = "height";
const GENESIS_META: &str = "genesis";

/// Name under which the reward engine subscribes to epoch hooks.
pub const REWARD_SUBSCRIBER: &str = "reward";

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Epoch(#[from] EpochError),

    #[error(transparent)]
    Reward(#[from] RewardError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("block {got} out of order, expected {expected}")]
    OutOfOrder { expected: Height, got: Height },
}

pub type Result<T> = std::result::Result<T, ChainError>;

/// A state-changing request delivered inside a block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Tx {
    RecordActivity {
        address: Address,
        action_type: String,
        volume: u64,
    },
    RegisterEpoch(EpochInfo),
    CreateProgram(RewardProgram),
    CancelProgram { id: ProgramId },
    Claim {
        address: Address,
        reward_program_id: ProgramId,
        epoch_id: String,
        epoch_number: EpochNumber,
    },
    ClaimAll { address: Address },
}

/// What happened to one transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum Receipt {
    Applied,
    ProgramCreated { id: ProgramId },
    Refunded { amount: u64 },
    Paid { coins: Vec<Coin> },
    /// Rejected without effect; `code` is the stable reason code.
    Rejected { code: &'static str, reason: String },
}

#[derive(Debug)]
pub struct BlockOutcome {
    pub height: Height,
    pub transitions: Vec<EpochTransition>,
    pub receipts: Vec<Receipt>,
    pub swept: Option<SweepSummary>,
    /// Events in emission order, to publish after commit.
    pub events: Vec<Event>,
}

/// Everything a block needs besides the store.
struct Modules {
    tracker: EpochTracker,
    engine: Arc<RewardDistributionEngine>,
    claims: ClaimLedger,
    sweep_interval: u64,
}

pub struct Chain<S: KvStore> {
    store: S,
    modules: Modules,
    height: Height,
    start_height: Height,
}

impl<S: KvStore> Chain<S> {
    /// Wire the modules over `store`. The reward engine is the only epoch
    /// subscriber.
    pub fn new(store: S, config: &NodeConfig) -> Result<Self> {
        let bank = Arc::new(LedgerBank);
        let engine_config = config.rewards.engine();
        let engine = Arc::new(RewardDistributionEngine::new(
            &engine_config,
            bank.clone(),
            Arc::new(ActivityLog),
            Arc::new(ActionRegistry::default()),
        )?);
        let claims = ClaimLedger::new(&engine_config, bank)?;

        let hooks = EpochHookDispatcher::builder()
            .subscribe(REWARD_SUBSCRIBER, engine.clone() as Arc<dyn EpochHooks>)?
            .build();
        let tracker = EpochTracker::new(config.epochs.tracker()).with_hooks(hooks)?;

        let height = codec::get::<Height>(&store, &keys::meta_key(HEIGHT_META))?.unwrap_or(0);
        Ok(Self {
            store,
            modules: Modules {
                tracker,
                engine,
                claims,
                sweep_interval: config.rewards.sweep_interval_blocks.max(1),
            },
            height,
            start_height: config.chain.start_height,
        })
    }

    /// Apply genesis epochs and balances once. Returns `false` if the
    /// store already holds a genesis.
    pub fn init_genesis(&mut self, config: &NodeConfig) -> Result<bool> {
        if self.store.has(&keys::meta_key(GENESIS_META))? {
            return Ok(false);
        }
        let mut block = BlockCache::new(&mut self.store);
        let mut ctx = Context::new(self.start_height, 0, &mut block);
        genesis::init_genesis(&mut ctx, &config.epochs.genesis_state())?;
        for account in &config.rewards.accounts {
            LedgerBank.mint(ctx.store_mut(), &account.address, &account.coin)?;
        }
        codec::put(ctx.store_mut(), &keys::meta_key(GENESIS_META), &true)?;
        drop(ctx);
        block.commit()?;
        tracing::info!(
            epochs = config.epochs.genesis.len(),
            accounts = config.rewards.accounts.len(),
            "genesis applied"
        );
        Ok(true)
    }

    /// Last committed height; 0 before the first block.
    pub fn height(&self) -> Height {
        self.height
    }

    pub fn next_height(&self) -> Height {
        if self.height == 0 {
            self.start_height
        } else {
            self.height + 1
        }
    }

    /// Committed state, for queries.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &RewardDistributionEngine {
        &self.modules.engine
    }

    /// Execute and commit the next block.
    pub fn execute_block(&mut self, time: u64, txs: Vec<Tx>) -> Result<BlockOutcome> {
        let height = self.next_height();
        let mut block = BlockCache::new(&mut self.store);
        let mut ctx = Context::new(height, time, &mut block);

        let transitions = self.modules.tracker.advance_for_block(&mut ctx)?;
        if !transitions.is_empty() {
            ActivityLog::prune_consumed(&mut ctx)?;
        }
        let receipts = txs
            .into_iter()
            .map(|tx| self.modules.deliver(&mut ctx, tx))
            .collect::<Result<Vec<_>>>()?;
        let swept = if height % self.modules.sweep_interval == 0 {
            Some(self.modules.claims.sweep_expired(&mut ctx)?)
        } else {
            None
        };
        codec::put(ctx.store_mut(), &keys::meta_key(HEIGHT_META), &height)?;

        let events = ctx.into_events();
        block.commit()?;
        self.height = height;

        tracing::debug!(
            height,
            transitions = transitions.len(),
            txs = receipts.len(),
            events = events.len(),
            "block committed"
        );
        Ok(BlockOutcome {
            height,
            transitions,
            receipts,
            swept,
            events,
        })
    }
}

impl Modules {
    /// Run one transaction in a nested cache. Non-fatal failures become a
    /// rejection receipt; fatal ones abort the block.
    fn deliver(&self, ctx: &mut Context<'_>, tx: Tx) -> Result<Receipt> {
        let (height, time) = (ctx.height(), ctx.time());
        let mut scratch = BlockCache::new(ctx.store_mut());
        let mut tx_ctx = Context::new(height, time, &mut scratch);
        match self.apply(&mut tx_ctx, tx) {
            Ok(receipt) => {
                let events = tx_ctx.into_events();
                scratch.commit()?;
                ctx.extend_events(events);
                Ok(receipt)
            }
            Err(e) if e.kind().is_fatal() => Err(e.into()),
            Err(e) => {
                tracing::debug!(height, code = e.code(), error = %e, "transaction rejected");
                Ok(Receipt::Rejected {
                    code: e.code(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn apply(&self, ctx: &mut Context<'_>, tx: Tx) -> std::result::Result<Receipt, RewardError> {
        match tx {
            Tx::RecordActivity {
                address,
                action_type,
                volume,
            } => {
                ActivityLog::record(ctx, &address, &action_type, volume)?;
                Ok(Receipt::Applied)
            }
            Tx::RegisterEpoch(info) => {
                genesis::register_epoch(ctx, info)?;
                Ok(Receipt::Applied)
            }
            Tx::CreateProgram(program) => {
                let id = self.engine.create_program(ctx, program)?;
                Ok(Receipt::ProgramCreated { id })
            }
            Tx::CancelProgram { id } => {
                let amount = self.engine.cancel_program(ctx, id)?;
                Ok(Receipt::Refunded { amount })
            }
            Tx::Claim {
                address,
                reward_program_id,
                epoch_id,
                epoch_number,
            } => {
                let coin = self.claims.claim(
                    ctx,
                    &address,
                    reward_program_id,
                    &epoch_id,
                    epoch_number,
                )?;
                Ok(Receipt::Paid { coins: vec![coin] })
            }
            Tx::ClaimAll { address } => {
                let coins = self.claims.claim_all(ctx, &address)?;
                Ok(Receipt::Paid { coins })
            }
        }
    }
}
