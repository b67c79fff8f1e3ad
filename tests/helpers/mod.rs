/// Test doubles: a simulated multi-node CAN bus and a recording listener.
use korri_docan::core::{Mtype, NResult};
use korri_docan::protocol::service::{DoCanService, ServiceConfig, TransportEvent, TransportListener};
use korri_docan::protocol::transport::{
    can_frame::CanFrame,
    n_ai::NAi,
    traits::can_interface::{CanInterface, FrameAck},
};
use embassy_time::Duration;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Hook run on every frame a node writes. Returning `false` loses the frame
/// on the bus (it is still reported as transmitted).
pub type Intercept = Box<dyn FnMut(&mut CanFrame) -> bool + Send>;

#[derive(Debug)]
#[allow(dead_code)]
pub enum BusError {
    Offline,
}

#[derive(Default)]
struct NodeQueues {
    inbox: VecDeque<CanFrame>,
    acks: VecDeque<FrameAck>,
    offline: bool,
    withhold_acks: bool,
    fail_next: usize,
    intercept: Option<Intercept>,
}

#[derive(Default)]
struct BusState {
    nodes: Vec<NodeQueues>,
    trace: Vec<(usize, CanFrame)>,
}

#[derive(Default)]
#[allow(dead_code)]
/// Broadcast bus: every frame written by one node lands in the inbox of all
/// the others, and the writer gets one acknowledgement per frame.
pub struct SimBus {
    state: Mutex<BusState>,
}

#[allow(dead_code)]
impl SimBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a new node.
    pub fn node(self: &Arc<Self>) -> SimNode {
        let mut state = self.state.lock().unwrap();
        state.nodes.push(NodeQueues::default());
        SimNode {
            bus: Arc::clone(self),
            index: state.nodes.len() - 1,
        }
    }

    /// Every frame written so far, with the index of its writer.
    pub fn trace(&self) -> Vec<(usize, CanFrame)> {
        self.state.lock().unwrap().trace.clone()
    }

    /// Frames written by `node`.
    pub fn written_by(&self, node: &SimNode) -> Vec<CanFrame> {
        self.trace()
            .into_iter()
            .filter(|(index, _)| *index == node.index)
            .map(|(_, frame)| frame)
            .collect()
    }

    fn with_node<R>(&self, index: usize, f: impl FnOnce(&mut NodeQueues) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state.nodes[index])
    }
}

#[derive(Clone)]
#[allow(dead_code)]
/// One controller attached to a [`SimBus`].
pub struct SimNode {
    bus: Arc<SimBus>,
    index: usize,
}

#[allow(dead_code)]
impl SimNode {
    /// Position of this node in the bus trace.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_offline(&self, offline: bool) {
        self.bus.with_node(self.index, |node| node.offline = offline);
    }

    /// Keep transmitting but never report the outcome.
    pub fn withhold_acks(&self, withhold: bool) {
        self.bus.with_node(self.index, |node| node.withhold_acks = withhold);
    }

    /// Report the next `count` writes as failed; they never reach the bus.
    pub fn fail_next(&self, count: usize) {
        self.bus.with_node(self.index, |node| node.fail_next = count);
    }

    pub fn intercept(&self, hook: Intercept) {
        self.bus.with_node(self.index, |node| node.intercept = Some(hook));
    }

    /// Put a frame straight into this node's inbox.
    pub fn inject(&self, frame: CanFrame) {
        self.bus.with_node(self.index, |node| node.inbox.push_back(frame));
    }
}

impl CanInterface for SimNode {
    type Error = BusError;

    fn frame_available(&self) -> usize {
        self.bus.with_node(self.index, |node| node.inbox.len())
    }

    fn read_frame(&self) -> Option<CanFrame> {
        self.bus.with_node(self.index, |node| node.inbox.pop_front())
    }

    fn write_frame(&self, frame: &CanFrame) -> Result<(), Self::Error> {
        let mut state = self.bus.state.lock().unwrap();
        let mut frame = *frame;
        let writer = &mut state.nodes[self.index];
        if writer.offline {
            return Err(BusError::Offline);
        }
        if writer.fail_next > 0 {
            writer.fail_next -= 1;
            writer.acks.push_back(FrameAck::Error);
            return Ok(());
        }
        let delivered = match writer.intercept.as_mut() {
            Some(hook) => hook(&mut frame),
            None => true,
        };
        if !writer.withhold_acks {
            writer.acks.push_back(FrameAck::Success);
        }
        state.trace.push((self.index, frame));
        if delivered {
            for (index, node) in state.nodes.iter_mut().enumerate() {
                if index != self.index && !node.offline {
                    node.inbox.push_back(frame);
                }
            }
        }
        Ok(())
    }

    fn active(&self) -> bool {
        self.bus.with_node(self.index, |node| !node.offline)
    }

    fn write_frame_ack(&self) -> Option<FrameAck> {
        self.bus.with_node(self.index, |node| node.acks.pop_front())
    }
}

//==================================================================================LISTENER
#[derive(Default)]
#[allow(dead_code)]
/// Keeps every notification for later assertions.
pub struct Recorder {
    events: Mutex<Vec<TransportEvent>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn indications(&self) -> Vec<(NAi, Vec<u8>, NResult)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Indication {
                    n_ai,
                    message,
                    result,
                    ..
                } => Some((n_ai, message, result)),
                _ => None,
            })
            .collect()
    }

    pub fn confirms(&self) -> Vec<(NAi, NResult)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::Confirm { n_ai, result, .. } => Some((n_ai, result)),
                _ => None,
            })
            .collect()
    }

    pub fn first_frames(&self) -> Vec<(NAi, u32)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TransportEvent::FirstFrameIndication { n_ai, length, .. } => Some((n_ai, length)),
                _ => None,
            })
            .collect()
    }
}

impl TransportListener for Recorder {
    fn on_confirm(&self, n_ai: NAi, result: NResult, mtype: Mtype) {
        self.events
            .lock()
            .unwrap()
            .push(TransportEvent::Confirm { n_ai, result, mtype });
    }

    fn on_indication(&self, n_ai: NAi, message: &[u8], result: NResult, mtype: Mtype) {
        self.events.lock().unwrap().push(TransportEvent::Indication {
            n_ai,
            message: message.to_vec(),
            result,
            mtype,
        });
    }

    fn on_first_frame_indication(&self, n_ai: NAi, length: u32, mtype: Mtype) {
        self.events
            .lock()
            .unwrap()
            .push(TransportEvent::FirstFrameIndication { n_ai, length, mtype });
    }
}

//==================================================================================NODES
#[allow(dead_code)]
pub type Node = DoCanService<SimNode, Arc<Recorder>>;

#[allow(dead_code)]
/// Configuration ticking on every call to `run_step`.
pub fn fast_config(source_address: u8) -> ServiceConfig {
    ServiceConfig::new(source_address).with_run_period(Duration::from_ticks(0))
}

#[allow(dead_code)]
/// Attach a service to `bus`; returns it with its recorder.
pub fn attach(bus: &Arc<SimBus>, config: ServiceConfig) -> (Node, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let service = DoCanService::new(bus.node(), Arc::clone(&recorder), config).unwrap();
    (service, recorder)
}

#[allow(dead_code)]
/// Tick every node until `done` holds or `limit` has passed.
pub fn run_until(nodes: &[&Node], limit: std::time::Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + limit;
    while std::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        for node in nodes {
            node.run_step();
        }
        std::thread::yield_now();
    }
    done()
}

#[allow(dead_code)]
/// PCI type nibble of every frame `node` wrote, e.g. `[0x1, 0x2, 0x2]`.
pub fn pci_trace(bus: &SimBus, node: &Node) -> Vec<u8> {
    bus.written_by(node.can())
        .iter()
        .map(|frame| frame.payload()[0] >> 4)
        .collect()
}
