//! Point-in-time snapshots of loop state.

use std::time::Duration;

use strand_entity::{EntityGauge, EntityManager};
use strand_event::{EventBus, EventStats};
use strand_loop::{Loop, LoopContext, LoopGroup, TaskError, TaskHandle};
use strand_tick::{TickManager, TickStats};

/// What one loop is holding.
///
/// Counter fields are `None` when the matching collector is disabled or the
/// component is not installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopStats {
    pub loop_id: String,
    pub entities: usize,
    pub entity_gauge: Option<EntityGauge>,
    pub ticks: usize,
    pub tick_stats: Option<TickStats>,
    pub subscribers: usize,
    pub event_stats: Option<EventStats>,
    pub components: usize,
    pub pending_timers: usize,
}

impl LoopStats {
    /// Read the stats of the loop `ctx` belongs to. Must run on that loop.
    #[must_use]
    pub fn read(ctx: &LoopContext) -> Self {
        let entities = ctx.component::<EntityManager>();
        let ticks = ctx.component::<TickManager>();
        let bus = ctx.component::<EventBus>();

        Self {
            loop_id: ctx.id().to_string(),
            entities: entities.as_ref().map_or(0, |m| m.entity_count()),
            entity_gauge: entities.as_ref().and_then(|m| m.gauge()),
            ticks: ticks.as_ref().map_or(0, |t| t.len()),
            tick_stats: ticks.as_ref().and_then(|t| t.stats()),
            subscribers: bus.as_ref().map_or(0, |b| b.subscriber_count()),
            event_stats: bus.as_ref().and_then(|b| b.stats()),
            components: ctx.component_count(),
            pending_timers: ctx.pending_timers(),
        }
    }
}

/// Snapshot one loop from any thread.
pub fn loop_stats(target: &Loop) -> TaskHandle<LoopStats> {
    target.submit(LoopStats::read)
}

/// Snapshot every loop in `group`, in group order.
pub fn collect_stats(group: &LoopGroup, timeout: Duration) -> Result<Vec<LoopStats>, TaskError> {
    group.broadcast_wait(LoopStats::read, timeout)
}
