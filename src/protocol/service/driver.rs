//! Async driver running the scheduler and the acknowledgement queue on
//! `embassy-time` tickers.
use super::{DoCanService, TransportListener};
use crate::protocol::transport::traits::can_interface::CanInterface;
use embassy_time::{Duration, Ticker};
use futures_util::{future::select, future::Either, pin_mut};

impl<C: CanInterface, L: TransportListener> DoCanService<C, L> {
    /// Run the service forever.
    ///
    /// The acknowledgement queue is polled every ack period and the scheduler
    /// ticks every run period. Cancel by dropping the future, e.g. by
    /// selecting it against a shutdown signal.
    pub async fn drive(&self) -> ! {
        let floor = Duration::from_millis(1);
        let mut run_ticker = Ticker::every(self.run_period.max(floor));
        let mut ack_ticker = Ticker::every(self.ack_period.max(floor));

        #[cfg(feature = "defmt")]
        defmt::info!(
            "DoCAN driver started (run {} ms, ack {} ms)",
            self.run_period.as_millis(),
            self.ack_period.as_millis()
        );

        loop {
            let run_due = run_ticker.next();
            let ack_due = ack_ticker.next();
            pin_mut!(run_due);
            pin_mut!(ack_due);

            match select(run_due, ack_due).await {
                Either::Left(((), _pending_ack)) => {
                    if self.can.active() {
                        self.tick_now();
                    }
                }
                Either::Right(((), _pending_run)) => self.run_ack_step(),
            }
        }
    }

    /// Tick regardless of the run period; the ticker already paces it.
    fn tick_now(&self) {
        let Ok(mut last_tick) = self.tick_gate.try_lock() else {
            return;
        };
        *last_tick = Some(embassy_time::Instant::now());
        self.tick();
    }
}
