//! PC/SC context and card-handle management
//!
//! All tables live under one mutex. That mutex is never held across a
//! blocking proxy call: operations look up what they need, drop the lock,
//! then block, and re-validate afterwards where it matters.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use protocol::{DeviceId, DeviceInfo, Direction, EndpointDescriptor, TransferKind, TransferPayload};
use tracing::{debug, info, warn};

use crate::config::ConnectorConfig;
use crate::error::{Error, Result};
use crate::pcsc::readers;
use crate::readiness::ReadinessFlag;
use crate::usb::proxy::{InterfaceClaim, UsbDeviceProxy};

/// Opaque PC/SC context handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u32);

/// Opaque PC/SC card handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CardHandle(pub u32);

/// What to do with the card when a connection ends
///
/// Accepted for PC/SC fidelity; power control of the card is class-driver
/// territory and not performed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Leave,
    Reset,
    Unpower,
    Eject,
}

/// bmRequestType bytes for the control-transfer fallback path.
const CLASS_INTERFACE_OUT: u8 = 0x21;
const CLASS_INTERFACE_IN: u8 = 0xa1;

struct ContextState {
    cards: HashSet<CardHandle>,
}

struct CardState {
    context: ContextHandle,
    device_id: DeviceId,
    reader_name: String,
    claim: InterfaceClaim,
    pipes: TransmitPipes,
    transmit_lock: Arc<Mutex<()>>,
}

/// Endpoints a Transmit uses, chosen from the claimed interface
#[derive(Debug, Clone)]
enum TransmitPipes {
    /// CCID-style bulk pair
    Bulk { out_endpoint: u8, in_endpoint: u8 },
    /// Readers without a bulk pair fall back to EP0 class requests
    Control { interface_number: u8 },
}

impl TransmitPipes {
    fn from_endpoints(interface_number: u8, endpoints: &[EndpointDescriptor]) -> Self {
        let bulk_out = endpoints
            .iter()
            .find(|ep| ep.kind == TransferKind::Bulk && ep.direction == Direction::Out);
        let bulk_in = endpoints
            .iter()
            .find(|ep| ep.kind == TransferKind::Bulk && ep.direction == Direction::In);
        match (bulk_out, bulk_in) {
            (Some(out), Some(input)) => TransmitPipes::Bulk {
                out_endpoint: out.endpoint_address,
                in_endpoint: input.endpoint_address,
            },
            _ => TransmitPipes::Control { interface_number },
        }
    }
}

struct Tables {
    contexts: HashMap<ContextHandle, ContextState>,
    cards: HashMap<CardHandle, CardState>,
    next_context: u32,
    next_card: u32,
    closed: bool,
}

/// One recognized reader within a single enumeration snapshot
struct ReaderBinding {
    name: String,
    device_id: DeviceId,
    interface_number: u8,
    endpoints: Vec<EndpointDescriptor>,
}

pub struct ScardManager {
    proxy: Arc<UsbDeviceProxy>,
    readiness: ReadinessFlag,
    tables: Mutex<Tables>,
    max_apdu_len: usize,
    transfer_timeout: Duration,
}

impl ScardManager {
    pub fn new(
        proxy: Arc<UsbDeviceProxy>,
        readiness: ReadinessFlag,
        config: &ConnectorConfig,
    ) -> Self {
        Self {
            proxy,
            readiness,
            tables: Mutex::new(Tables {
                contexts: HashMap::new(),
                cards: HashMap::new(),
                next_context: 1,
                next_card: 1,
                closed: false,
            }),
            max_apdu_len: config.pcsc.max_apdu_len,
            transfer_timeout: config.transfers.timeout(),
        }
    }

    /// Establish a fresh context
    ///
    /// Purely local; succeeds without contacting the peer, even before the
    /// readiness signal.
    pub fn establish_context(&self) -> Result<ContextHandle> {
        let mut tables = self.lock_tables();
        if tables.closed {
            return Err(Error::ChannelClosed);
        }
        let handle = ContextHandle(tables.next_context);
        tables.next_context += 1;
        tables.contexts.insert(
            handle,
            ContextState {
                cards: HashSet::new(),
            },
        );
        debug!("established context {}", handle.0);
        Ok(handle)
    }

    /// Release a context and every card handle it owns
    pub fn release_context(&self, context: ContextHandle) -> Result<()> {
        let claims: Vec<InterfaceClaim> = {
            let mut tables = self.lock_tables();
            if tables.closed {
                return Err(Error::ChannelClosed);
            }
            let state = tables
                .contexts
                .remove(&context)
                .ok_or(Error::InvalidHandle)?;
            let cards: Vec<CardHandle> = state.cards.into_iter().collect();
            cards
                .into_iter()
                .filter_map(|card| tables.cards.remove(&card))
                .map(|card| card.claim)
                .collect()
        };

        // Card handles are already invalid; interface release is
        // best-effort and happens outside the table lock.
        for claim in claims {
            if let Err(e) = self.proxy.release_interface(&claim) {
                warn!(
                    "release of interface {} on device {} failed: {e}",
                    claim.interface_number(),
                    claim.device_id().0
                );
            }
        }
        info!("released context {}", context.0);
        Ok(())
    }

    /// List the names of attached smart-card readers
    pub fn list_readers(&self, context: ContextHandle) -> Result<Vec<String>> {
        self.check_ready()?;
        self.check_context(context)?;
        let bindings = self.enumerate_readers()?;
        if bindings.is_empty() {
            return Err(Error::NoReadersAvailable);
        }
        Ok(bindings.into_iter().map(|binding| binding.name).collect())
    }

    /// Connect to a reader by name, claiming its smart-card interface
    pub fn connect(&self, context: ContextHandle, reader_name: &str) -> Result<CardHandle> {
        self.check_ready()?;
        self.check_context(context)?;

        let binding = self
            .enumerate_readers()?
            .into_iter()
            .find(|binding| binding.name == reader_name)
            .ok_or(Error::ReaderUnavailable)?;

        let claim = self
            .proxy
            .claim_interface(binding.device_id, binding.interface_number)
            .map_err(|e| match e {
                Error::DeviceNotFound => Error::ReaderUnavailable,
                other => other,
            })?;
        let pipes = TransmitPipes::from_endpoints(binding.interface_number, &binding.endpoints);

        let mut tables = self.lock_tables();
        if tables.closed {
            drop(tables);
            let _ = self.proxy.release_interface(&claim);
            return Err(Error::ChannelClosed);
        }
        if !tables.contexts.contains_key(&context) {
            // context released while the claim was in flight
            drop(tables);
            if let Err(e) = self.proxy.release_interface(&claim) {
                warn!("rollback release failed: {e}");
            }
            return Err(Error::InvalidHandle);
        }
        let card = CardHandle(tables.next_card);
        tables.next_card += 1;
        tables.cards.insert(
            card,
            CardState {
                context,
                device_id: binding.device_id,
                reader_name: reader_name.to_string(),
                claim,
                pipes,
                transmit_lock: Arc::new(Mutex::new(())),
            },
        );
        if let Some(ctx) = tables.contexts.get_mut(&context) {
            ctx.cards.insert(card);
        }
        info!("card {} connected to \"{reader_name}\"", card.0);
        Ok(card)
    }

    /// Disconnect a card handle
    pub fn disconnect(&self, card: CardHandle, disposition: Disposition) -> Result<()> {
        let (claim, reader_name) = {
            let mut tables = self.lock_tables();
            if tables.closed {
                return Err(Error::ChannelClosed);
            }
            let state = tables.cards.remove(&card).ok_or(Error::InvalidHandle)?;
            if let Some(ctx) = tables.contexts.get_mut(&state.context) {
                ctx.cards.remove(&card);
            }
            (state.claim, state.reader_name)
        };

        debug!("card {} disconnected from \"{reader_name}\" ({disposition:?})", card.0);
        if let Err(e) = self.proxy.release_interface(&claim) {
            warn!("interface release on disconnect failed: {e}");
        }
        Ok(())
    }

    /// Exchange one APDU with the card
    ///
    /// Transmits are serialized per card handle: the claimed interface
    /// cannot multiplex independent transfers.
    pub fn transmit(&self, card: CardHandle, apdu: &[u8]) -> Result<Vec<u8>> {
        self.check_ready()?;
        if apdu.len() > self.max_apdu_len {
            return Err(Error::ApduTooLong {
                len: apdu.len(),
                max: self.max_apdu_len,
            });
        }

        let (device_id, pipes, transmit_lock) = {
            let tables = self.lock_tables();
            if tables.closed {
                return Err(Error::ChannelClosed);
            }
            let state = tables.cards.get(&card).ok_or(Error::InvalidHandle)?;
            (
                state.device_id,
                state.pipes.clone(),
                Arc::clone(&state.transmit_lock),
            )
        };

        let _guard = transmit_lock.lock().expect("transmit lock poisoned");
        let result = self.exchange(device_id, &pipes, apdu);
        result.map_err(|e| match e {
            // detached since Connect
            Error::DeviceNotFound => Error::ReaderUnavailable,
            Error::MalformedDescriptor(inner) => {
                warn!("transmit on card {} hit malformed peer data: {inner}", card.0);
                Error::MalformedDescriptor(inner)
            }
            other => other,
        })
    }

    /// Channel teardown: every context and card reaches its terminal state
    ///
    /// Safe to call from any thread; never waits for blocked callers.
    pub(crate) fn channel_closed(&self) {
        let mut tables = self.lock_tables();
        if tables.closed {
            return;
        }
        tables.closed = true;
        let contexts = tables.contexts.len();
        let cards = tables.cards.len();
        tables.contexts.clear();
        tables.cards.clear();
        info!("channel closed: dropped {contexts} contexts and {cards} cards");
    }

    /// Write the command APDU and read the response over the card's pipes
    fn exchange(&self, device_id: DeviceId, pipes: &TransmitPipes, apdu: &[u8]) -> Result<Vec<u8>> {
        match *pipes {
            TransmitPipes::Bulk {
                out_endpoint,
                in_endpoint,
            } => {
                self.proxy.bulk_transfer(
                    device_id,
                    out_endpoint,
                    TransferPayload::Write {
                        data: apdu.to_vec(),
                    },
                    self.transfer_timeout,
                )?;
                self.proxy.bulk_transfer(
                    device_id,
                    in_endpoint,
                    TransferPayload::Read {
                        length: self.max_apdu_len as u32,
                    },
                    self.transfer_timeout,
                )
            }
            TransmitPipes::Control { interface_number } => {
                self.proxy.control_transfer(
                    device_id,
                    CLASS_INTERFACE_OUT,
                    0x00,
                    0,
                    u16::from(interface_number),
                    TransferPayload::Write {
                        data: apdu.to_vec(),
                    },
                    self.transfer_timeout,
                )?;
                self.proxy.control_transfer(
                    device_id,
                    CLASS_INTERFACE_IN,
                    0x00,
                    0,
                    u16::from(interface_number),
                    TransferPayload::Read {
                        length: self.max_apdu_len as u32,
                    },
                    self.transfer_timeout,
                )
            }
        }
    }

    /// One snapshot of recognized readers, in peer enumeration order
    ///
    /// Derived fresh on every call; reader-to-device mappings are never
    /// cached across calls.
    fn enumerate_readers(&self) -> Result<Vec<ReaderBinding>> {
        let devices = self.proxy.list_devices()?;
        let mut recognized: Vec<(DeviceInfo, u8, Vec<EndpointDescriptor>)> = Vec::new();
        for info in devices {
            match self.proxy.active_configuration(info.id) {
                Ok(config) => {
                    if let Some(iface) = readers::smart_card_interface(&config) {
                        recognized.push((info, iface.interface_number, iface.endpoints.clone()));
                    }
                }
                // detached between the snapshot and the descriptor fetch
                Err(Error::DeviceNotFound) => continue,
                Err(Error::MalformedDescriptor(e)) => {
                    warn!("skipping device {}: malformed descriptor: {e}", info.id.0);
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        let infos: Vec<DeviceInfo> = recognized.iter().map(|(info, _, _)| info.clone()).collect();
        let names = readers::derive_reader_names(&infos);
        Ok(names
            .into_iter()
            .zip(recognized)
            .map(|(name, (info, interface_number, endpoints))| ReaderBinding {
                name,
                device_id: info.id,
                interface_number,
                endpoints,
            })
            .collect())
    }

    fn check_ready(&self) -> Result<()> {
        if self.readiness.is_ready() {
            Ok(())
        } else {
            Err(Error::NotReady)
        }
    }

    fn check_context(&self, context: ContextHandle) -> Result<()> {
        let tables = self.lock_tables();
        if tables.closed {
            Err(Error::ChannelClosed)
        } else if tables.contexts.contains_key(&context) {
            Ok(())
        } else {
            Err(Error::InvalidHandle)
        }
    }

    fn lock_tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().expect("pcsc tables mutex poisoned")
    }
}
