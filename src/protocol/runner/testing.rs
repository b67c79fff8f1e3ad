//! In-memory CAN controller and runner helpers for unit tests.
use crate::core::Mtype;
use crate::infra::budget::MemoryBudget;
use crate::protocol::runner::{
    MessageRunner, ReceiverRunner, ReceiverState, RunnerCell, RunnerHandle, SenderRunner,
    SenderState,
};
use crate::protocol::transport::ack_queue::AckQueue;
use crate::protocol::transport::can_frame::CanFrame;
use crate::protocol::transport::n_ai::NAi;
use crate::protocol::transport::pdu::{encode_flow_control, FlowStatus, StMin};
use crate::protocol::transport::traits::can_interface::{CanInterface, FrameAck};
use alloc::sync::Arc;
use embassy_time::Duration;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::vec::Vec;

#[derive(Debug)]
pub struct WriteRefused;

/// Records written frames; acknowledgements and inbound frames are queued by
/// the test.
#[derive(Default)]
pub struct FakeCan {
    pub written: Mutex<Vec<CanFrame>>,
    pub inbound: Mutex<VecDeque<CanFrame>>,
    pub acks: Mutex<VecDeque<FrameAck>>,
    pub refuse_writes: Mutex<bool>,
    pub offline: Mutex<bool>,
}

impl FakeCan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Vec<CanFrame> {
        self.written.lock().unwrap().clone()
    }

    pub fn last_written(&self) -> Option<CanFrame> {
        self.written.lock().unwrap().last().copied()
    }

    pub fn push_ack(&self, ack: FrameAck) {
        self.acks.lock().unwrap().push_back(ack);
    }

    pub fn push_inbound(&self, frame: CanFrame) {
        self.inbound.lock().unwrap().push_back(frame);
    }

    pub fn refuse_writes(&self, refuse: bool) {
        *self.refuse_writes.lock().unwrap() = refuse;
    }
}

impl CanInterface for FakeCan {
    type Error = WriteRefused;

    fn frame_available(&self) -> usize {
        self.inbound.lock().unwrap().len()
    }

    fn read_frame(&self) -> Option<CanFrame> {
        self.inbound.lock().unwrap().pop_front()
    }

    fn write_frame(&self, frame: &CanFrame) -> Result<(), Self::Error> {
        if *self.refuse_writes.lock().unwrap() {
            return Err(WriteRefused);
        }
        self.written.lock().unwrap().push(*frame);
        Ok(())
    }

    fn active(&self) -> bool {
        !*self.offline.lock().unwrap()
    }

    fn write_frame_ack(&self) -> Option<FrameAck> {
        self.acks.lock().unwrap().pop_front()
    }
}

//==================================================================================RUNNER_HELPERS
pub const LOCK: Duration = Duration::from_millis(100);

pub fn budget(bytes: i64) -> Arc<MemoryBudget> {
    Arc::new(MemoryBudget::new(bytes))
}

pub fn sender(n_ai: NAi, message: &[u8], budget: &Arc<MemoryBudget>) -> RunnerHandle {
    let runner = SenderRunner::new(n_ai, message, Mtype::Diagnostics, budget, None).unwrap();
    RunnerCell::new(MessageRunner::Sender(runner), LOCK)
}

pub fn receiver(n_ai: NAi, budget: &Arc<MemoryBudget>, block_size: u8, st_min: StMin) -> RunnerHandle {
    let runner = ReceiverRunner::new(n_ai, budget, block_size, st_min).unwrap();
    RunnerCell::new(MessageRunner::Receiver(runner), LOCK)
}

pub fn sender_state(handle: &RunnerHandle) -> SenderState {
    match &*handle.lock().unwrap() {
        MessageRunner::Sender(runner) => runner.state(),
        MessageRunner::Receiver(_) => panic!("not a sender"),
    }
}

pub fn receiver_state(handle: &RunnerHandle) -> ReceiverState {
    match &*handle.lock().unwrap() {
        MessageRunner::Receiver(runner) => runner.state(),
        MessageRunner::Sender(_) => panic!("not a receiver"),
    }
}

pub fn received_message(handle: &RunnerHandle) -> Vec<u8> {
    match &*handle.lock().unwrap() {
        MessageRunner::Receiver(runner) => runner.message().to_vec(),
        MessageRunner::Sender(_) => panic!("not a receiver"),
    }
}

/// Acknowledge `count` written frames and deliver the callbacks.
pub fn acknowledge(can: &FakeCan, acks: &AckQueue, count: usize) -> usize {
    for _ in 0..count {
        can.push_ack(FrameAck::Success);
    }
    while acks.run_step(can) {}
    acks.run_available_ack_callbacks()
}

/// Flow Control coming back to the sender keyed `n_ai`.
pub fn flow_control(n_ai: NAi, status: FlowStatus, block_size: u8, st_min: StMin) -> CanFrame {
    encode_flow_control(n_ai.reversed(), status, block_size, st_min)
}
