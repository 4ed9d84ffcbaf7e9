// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! DDI Implementation - Mock Adapter - Device Module

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::thread;
use std::time::Duration;

use hbamgmt_ddi_interface::*;
use parking_lot::Mutex;
use parking_lot::RwLock;

use crate::dma::MockDma;

/// Size of each buffer in the mock receive pool
pub const RX_BUFFER_SIZE: usize = 1024;

/// Number of buffers posted to the mock receive pool at open
pub const RX_POOL_DEPTH: usize = 64;

/// Completion status the mock reports when it cannot walk a descriptor list
pub const MOCK_STATUS_DMA_ERROR: u32 = 0x0b;

// Upper bound on descriptor pages followed for one list
const MAX_BPL_PAGES: usize = 64;

/// Reply produced by a mock responder
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MockReply {
    /// Completion status; zero is success
    pub status: u32,

    /// Extended status
    pub ext_status: u32,

    /// Bytes returned in the command slot
    pub inline: Vec<u8>,

    /// Bytes scattered into the receive entries
    pub data: Vec<u8>,
}

/// Computes the reply for a command: `(kind, command slot, transmit bytes)`
pub type Responder = dyn Fn(CommandKind, &[u8], &[u8]) -> MockReply + Send + Sync;

struct MockSettings {
    latency: Duration,
    hold: bool,
    reject_next: usize,
    responder: Option<Arc<Responder>>,
    diagnostic_fragments: bool,
    rx_fragment_size: usize,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            hold: false,
            reject_next: 0,
            responder: None,
            diagnostic_fragments: false,
            rx_fragment_size: RX_BUFFER_SIZE,
        }
    }
}

#[derive(Debug)]
struct Delivery {
    tag: CorrelationTag,
    resp: ResponseSlot,
    // Loopback echo delivered as an unsolicited frame after the completion
    frame: Option<Vec<u8>>,
}

struct MockCore {
    dma: MockDma,
    caps: DevCaps,
    sink: RwLock<Option<Weak<dyn DeviceEventSink>>>,
    settings: Mutex<MockSettings>,
    held: Mutex<Vec<Delivery>>,
    rx_pool: Mutex<Vec<DmaBuffer>>,
    submitted: AtomicUsize,
}

/// DDI Implementation - Mock Adapter Device
#[derive(Clone)]
pub struct DdiMockDev {
    core: Arc<MockCore>,
}

impl std::fmt::Debug for DdiMockDev {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DdiMockDev")
            .field("caps", &self.core.caps)
            .field("submitted", &self.submitted_count())
            .finish()
    }
}

impl DdiMockDev {
    /// Create a mock adapter with the given capabilities and a full
    /// receive pool.
    ///
    /// # Error
    /// * `DdiError::ResourceExhausted` - The receive pool could not be posted
    pub fn new(caps: DevCaps) -> DdiResult<Self> {
        tracing::debug!(?caps, "Opening DdiMockDev");

        let dma = MockDma::new();
        let mut rx_pool = Vec::with_capacity(RX_POOL_DEPTH);
        for _ in 0..RX_POOL_DEPTH {
            rx_pool.push(dma.allocate_dma_buffer(RX_BUFFER_SIZE)?);
        }

        Ok(Self {
            core: Arc::new(MockCore {
                dma,
                caps,
                sink: RwLock::new(None),
                settings: Mutex::new(MockSettings::default()),
                held: Mutex::new(Vec::new()),
                rx_pool: Mutex::new(rx_pool),
                submitted: AtomicUsize::new(0),
            }),
        })
    }

    /// Device memory, for fault injection and leak checks
    pub fn dma(&self) -> &MockDma {
        &self.core.dma
    }

    /// Delay every completion by `latency`
    pub fn set_latency(&self, latency: Duration) {
        self.core.settings.lock().latency = latency;
    }

    /// While `hold` is set, completions are parked until
    /// [`DdiMockDev::release_held`] is called.
    pub fn hold_completions(&self, hold: bool) {
        self.core.settings.lock().hold = hold;
    }

    /// Number of parked completions
    pub fn held_count(&self) -> usize {
        self.core.held.lock().len()
    }

    /// Deliver every parked completion on the calling thread.
    ///
    /// # Returns
    /// * `usize` - Completions delivered
    pub fn release_held(&self) -> usize {
        let held = std::mem::take(&mut *self.core.held.lock());
        let count = held.len();
        for delivery in held {
            self.core.deliver(delivery);
        }
        count
    }

    /// Refuse the next `count` submissions
    pub fn reject_next_submits(&self, count: usize) {
        self.core.settings.lock().reject_next = count;
    }

    /// Replace the default echo responder
    pub fn set_responder<F>(&self, responder: F)
    where
        F: Fn(CommandKind, &[u8], &[u8]) -> MockReply + Send + Sync + 'static,
    {
        self.core.settings.lock().responder = Some(Arc::new(responder));
    }

    /// Deliver unsolicited frames in freshly allocated diagnostic buffers
    /// instead of receive pool buffers.
    pub fn set_diagnostic_fragments(&self, diagnostic: bool) {
        self.core.settings.lock().diagnostic_fragments = diagnostic;
    }

    /// Split unsolicited frames into fragments of at most `size` bytes
    pub fn set_rx_fragment_size(&self, size: usize) {
        self.core.settings.lock().rx_fragment_size = size.clamp(1, RX_BUFFER_SIZE);
    }

    /// Buffers currently available in the receive pool
    pub fn rx_pool_available(&self) -> usize {
        self.core.rx_pool.lock().len()
    }

    /// Commands handed to the device, including rejected ones
    pub fn submitted_count(&self) -> usize {
        self.core.submitted.load(Ordering::Relaxed)
    }

    /// Deliver `payload` as an unsolicited frame on the calling thread.
    ///
    /// # Error
    /// * `DdiError::ResourceExhausted` - Not enough receive buffers
    pub fn inject_unsolicited(&self, payload: &[u8], tag: CorrelationTag) -> DdiResult<()> {
        let chain = self.core.build_chain(payload)?;
        self.inject_chain(chain, tag);
        Ok(())
    }

    /// Deliver a caller-built fragment chain on the calling thread
    pub fn inject_chain(&self, chain: FragmentChain, tag: CorrelationTag) {
        match self.core.sink() {
            Some(sink) => sink.on_unsolicited_frame(chain, tag),
            None => {
                tracing::debug!(tag, "no event sink; dropping unsolicited frame");
                self.core.dispose_chain(chain);
            }
        }
    }

    /// Take a buffer from the receive pool, as the device does when a frame
    /// arrives.
    pub fn take_rx_buffer(&self) -> Option<DmaBuffer> {
        self.core.rx_pool.lock().pop()
    }
}

impl DmaAllocator for DdiMockDev {
    fn allocate_dma_buffer(&self, size: usize) -> DdiResult<DmaBuffer> {
        self.core.dma.allocate_dma_buffer(size)
    }

    fn release_dma_buffer(&self, buffer: DmaBuffer) {
        self.core.dma.release_dma_buffer(buffer)
    }
}

impl DdiDev for DdiMockDev {
    fn caps(&self) -> DevCaps {
        self.core.caps
    }

    fn set_event_sink(&self, sink: Weak<dyn DeviceEventSink>) {
        *self.core.sink.write() = Some(sink);
    }

    #[tracing::instrument(skip(self, req), fields(tag = req.tag, kind = ?req.kind))]
    fn submit_command(&self, req: SubmitRequest<'_>) -> SubmitStatus {
        self.core.submitted.fetch_add(1, Ordering::Relaxed);

        {
            let mut settings = self.core.settings.lock();
            if settings.reject_next > 0 {
                settings.reject_next -= 1;
                tracing::debug!("mock device rejecting submission");
                return SubmitStatus::Rejected;
            }
        }

        let delivery = match self.core.execute(&req) {
            Ok(delivery) => delivery,
            Err(err) => {
                tracing::warn!(?err, "mock device failed to process descriptor lists");
                Delivery {
                    tag: req.tag,
                    resp: ResponseSlot {
                        status: MOCK_STATUS_DMA_ERROR,
                        ..Default::default()
                    },
                    frame: None,
                }
            }
        };

        self.core.schedule(delivery);
        SubmitStatus::Accepted
    }

    fn repost_receive_buffer(&self, buffer: DmaBuffer) {
        if buffer.len() != RX_BUFFER_SIZE {
            tracing::warn!(
                addr = buffer.addr(),
                len = buffer.len(),
                "reposted buffer does not fit the receive pool"
            );
        }
        buffer.zero();
        self.core.rx_pool.lock().push(buffer);
    }
}

impl MockCore {
    fn sink(&self) -> Option<Arc<dyn DeviceEventSink>> {
        self.sink.read().as_ref().and_then(Weak::upgrade)
    }

    fn execute(&self, req: &SubmitRequest<'_>) -> DdiResult<Delivery> {
        let mut tx = Vec::new();
        let mut rx = Vec::new();
        for bpl in req.bpls {
            for bde in self.walk_bpl(*bpl)? {
                match bde.kind() {
                    Ok(BdeKind::Transmit) => {
                        tx.extend(self.dma.dma_read(bde.addr(), bde.size() as usize)?);
                    }
                    Ok(BdeKind::Receive) => rx.push(bde),
                    _ => Err(DdiError::MalformedResponse)?,
                }
            }
        }

        if req.kind == CommandKind::LoopbackTransmit {
            return Ok(Delivery {
                tag: req.tag,
                resp: ResponseSlot::default(),
                frame: Some(tx),
            });
        }

        let responder = self.settings.lock().responder.clone();
        let reply = match responder {
            Some(responder) => responder(req.kind, req.command, &tx),
            None => echo(req.kind, req.command, &tx),
        };

        let written = self.scatter(&rx, &reply.data)?;
        Ok(Delivery {
            tag: req.tag,
            resp: ResponseSlot {
                status: reply.status,
                ext_status: reply.ext_status,
                bytes_returned: written as u32,
                inline: reply.inline,
            },
            frame: None,
        })
    }

    /// Collect the data entries of one descriptor list, following links.
    fn walk_bpl(&self, bpl: BplRef) -> DdiResult<Vec<Bde>> {
        let mut entries = Vec::new();
        let mut page = Some(bpl);
        let mut pages = 0;

        while let Some(current) = page.take() {
            pages += 1;
            if pages > MAX_BPL_PAGES || current.size as usize % BDE_SIZE != 0 {
                Err(DdiError::MalformedResponse)?
            }

            let bytes = self.dma.dma_read(current.addr, current.size as usize)?;
            for raw in bytes.chunks_exact(BDE_SIZE) {
                let bde = Bde::decode(raw)?;
                if bde.is_link() {
                    page = Some(BplRef {
                        addr: bde.addr(),
                        size: bde.size(),
                    });
                    break;
                }
                entries.push(bde);
            }
        }

        Ok(entries)
    }

    fn scatter(&self, rx: &[Bde], data: &[u8]) -> DdiResult<usize> {
        let mut written = 0;
        for bde in rx {
            if written == data.len() {
                break;
            }
            let n = (bde.size() as usize).min(data.len() - written);
            self.dma.dma_write(bde.addr(), &data[written..written + n])?;
            written += n;
        }
        Ok(written)
    }

    fn schedule(self: &Arc<Self>, delivery: Delivery) {
        let (hold, latency) = {
            let settings = self.settings.lock();
            (settings.hold, settings.latency)
        };

        if hold {
            tracing::debug!(tag = delivery.tag, "holding completion");
            self.held.lock().push(delivery);
            return;
        }

        let core = self.clone();
        thread::spawn(move || {
            if !latency.is_zero() {
                thread::sleep(latency);
            }
            core.deliver(delivery);
        });
    }

    fn deliver(&self, delivery: Delivery) {
        let Some(sink) = self.sink() else {
            tracing::debug!(tag = delivery.tag, "no event sink; dropping completion");
            return;
        };

        sink.on_device_completion(delivery.tag, delivery.resp);

        if let Some(frame) = delivery.frame {
            match self.build_chain(&frame) {
                Ok(chain) => sink.on_unsolicited_frame(chain, delivery.tag),
                Err(err) => {
                    tracing::warn!(tag = delivery.tag, ?err, "dropping loopback echo")
                }
            }
        }
    }

    fn build_chain(&self, payload: &[u8]) -> DdiResult<FragmentChain> {
        let (fragment_size, diagnostic) = {
            let settings = self.settings.lock();
            (settings.rx_fragment_size, settings.diagnostic_fragments)
        };

        let class = if diagnostic {
            BufferClass::Diagnostic
        } else {
            BufferClass::Pool
        };

        let mut chain = FragmentChain::new();
        for piece in payload.chunks(fragment_size) {
            let buffer = match class {
                BufferClass::Diagnostic => self.dma.allocate_dma_buffer(piece.len()),
                BufferClass::Pool => self.rx_pool.lock().pop().ok_or(DdiError::ResourceExhausted),
            };

            let buffer = match buffer {
                Ok(buffer) => buffer,
                Err(err) => {
                    self.dispose_chain(chain);
                    return Err(err);
                }
            };

            let written = buffer.write_at(0, piece);
            chain.push(Fragment {
                buffer,
                len: piece.len(),
                class,
                total_len: None,
            });
            if let Err(err) = written {
                self.dispose_chain(chain);
                return Err(err);
            }
        }

        if self.caps.footer_length_frames {
            if let Some(last) = chain.last_mut() {
                last.total_len = Some(payload.len() as u32);
            }
        }

        Ok(chain)
    }

    fn dispose_chain(&self, chain: FragmentChain) {
        for fragment in chain {
            match fragment.class {
                BufferClass::Pool => self.rx_pool.lock().push(fragment.buffer),
                BufferClass::Diagnostic => self.dma.release_dma_buffer(fragment.buffer),
            }
        }
    }
}

/// Default responder: the device answers with what it was sent.
fn echo(kind: CommandKind, command: &[u8], tx: &[u8]) -> MockReply {
    MockReply {
        status: 0,
        ext_status: 0,
        inline: if kind == CommandKind::Mailbox {
            command.to_vec()
        } else {
            Vec::new()
        },
        data: tx.to_vec(),
    }
}
