//! ALSA sequencer client
//!
//! Opens its own sequencer client with one output port and one queue, connects
//! the port to a destination (`client:port`) and schedules every event on the
//! queue at an absolute tick. Playback starts [`LEAD_TICKS`] into the queue so
//! the sequencer has time to start it.
//!
//! The queue runs at 96 ticks per beat and every note-length tick is counted
//! twice ([`TICKS_PER_WHOLE`] is 768), so the queue tempo is half the
//! microseconds per quarter note: `500000` at 60 quarter notes per minute.
//!
//! Stopping, and starting a new stream, first silences the destination:
//! events still waiting on the queue are dropped and all-notes-off is sent
//! directly on every channel.

use std::fmt;

use tracing::{debug, info};

use super::{Backend, BackendKind};
use crate::error::SoundError;
use crate::event::{Event, NUM_CHANNELS};
use crate::rat::Rat;
use crate::stream::EventStream;

/// Ticks before the first event of a stream.
pub const LEAD_TICKS: u32 = 30;

/// Queue ticks in a whole note.
pub const TICKS_PER_WHOLE: i64 = 96 * 2 * 4;

/// Queue tempo at 60 quarter notes per minute.
pub const DEFAULT_QUEUE_TEMPO: u32 = 500_000;

/// Queue tempo value for `bpm` beats of `1/beat_unit` per minute.
pub fn queue_tempo(bpm: u32, beat_unit: u32) -> u32 {
    (DEFAULT_QUEUE_TEMPO as u64 * 60 * beat_unit as u64 / (4 * bpm.max(1) as u64)).min(u32::MAX as u64) as u32
}

pub fn delta_ticks(len: Rat) -> u32 {
    (len * TICKS_PER_WHOLE).trunc().max(0) as u32
}

/// A message scheduled on the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqMessage {
    ProgramChange { channel: u8, program: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8, velocity: u8 },
    /// Change the queue tempo.
    Tempo(u32),
    /// Stop the queue.
    Stop,
    /// Controller 123 on `channel`.
    AllNotesOff { channel: u8 },
}

/// A sequencer client with an output port and a queue.
pub trait SeqConnection {
    fn set_queue_tempo(&mut self, tempo: u32) -> Result<(), SoundError>;

    fn start_queue(&mut self) -> Result<(), SoundError>;

    fn stop_queue(&mut self) -> Result<(), SoundError>;

    /// Put `message` in the output buffer, scheduled at absolute `tick`.
    fn schedule(&mut self, tick: u32, message: SeqMessage) -> Result<(), SoundError>;

    /// Hand everything buffered over to the sequencer.
    fn drain(&mut self) -> Result<(), SoundError>;

    /// Throw away buffered events and those still waiting on the queue.
    fn drop_pending(&mut self) -> Result<(), SoundError>;

    /// Deliver `message` to the destination right away, bypassing the queue.
    fn send_now(&mut self, message: SeqMessage) -> Result<(), SoundError>;
}

/// Stop the queue, drop what it still holds and turn off every note.
fn silence<C: SeqConnection>(conn: &mut C) -> Result<(), SoundError> {
    conn.stop_queue()?;
    conn.drop_pending()?;
    for channel in 0..NUM_CHANNELS {
        conn.send_now(SeqMessage::AllNotesOff { channel })?;
    }
    Ok(())
}

/// A port other clients can write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPort {
    pub client: i32,
    pub port: i32,
    pub client_name: String,
    pub port_name: String,
}

impl DestinationPort {
    pub fn address(&self) -> (i32, i32) {
        (self.client, self.port)
    }
}

impl fmt::Display for DestinationPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {} {}",
            self.client, self.port, self.client_name, self.port_name
        )
    }
}

pub struct AlsaSequencer<C: SeqConnection> {
    conn: Option<C>,
    dest: (i32, i32),
}

impl<C: SeqConnection> AlsaSequencer<C> {
    pub fn new(conn: C, dest: (i32, i32)) -> Self {
        AlsaSequencer {
            conn: Some(conn),
            dest,
        }
    }

    pub fn connection(&self) -> Option<&C> {
        self.conn.as_ref()
    }

    /// The `client:port` events are sent to.
    pub fn destination(&self) -> (i32, i32) {
        self.dest
    }
}

#[cfg(all(feature = "alsa", target_os = "linux"))]
impl AlsaSequencer<linux::AlsaConnection> {
    pub fn open(dest: (i32, i32), verbose_init: bool) -> Result<Self, SoundError> {
        Ok(Self::new(linux::AlsaConnection::open(dest, verbose_init)?, dest))
    }
}

impl<C: SeqConnection> Backend for AlsaSequencer<C> {
    fn kind(&self) -> BackendKind {
        BackendKind::AlsaSequencer
    }

    fn play_event_stream(&mut self, stream: &EventStream) -> Result<(), SoundError> {
        let conn = self.conn.as_mut().ok_or(SoundError::Closed {
            kind: BackendKind::AlsaSequencer,
        })?;
        silence(conn)?;
        let mut tick = LEAD_TICKS;
        conn.set_queue_tempo(DEFAULT_QUEUE_TEMPO)?;
        conn.start_queue()?;
        for event in stream {
            let message = match *event {
                Event::SetPatch { channel, patch } => SeqMessage::ProgramChange {
                    channel,
                    program: patch,
                },
                Event::NoteOn { channel, pitch, velocity } => SeqMessage::NoteOn {
                    channel,
                    note: pitch,
                    velocity,
                },
                Event::NoteOff { channel, pitch, velocity } => SeqMessage::NoteOff {
                    channel,
                    note: pitch,
                    velocity,
                },
                Event::Tempo { bpm, beat_unit } => SeqMessage::Tempo(queue_tempo(bpm, beat_unit)),
                Event::NoteLenTime(len) => {
                    tick += delta_ticks(len);
                    continue;
                }
                Event::Volume { .. } | Event::Bender { .. } => {
                    debug!(?event, "ignored by the ALSA sequencer");
                    continue;
                }
            };
            conn.schedule(tick, message)?;
        }
        conn.schedule(tick, SeqMessage::Stop)?;
        conn.drain()
    }

    fn stop(&mut self) -> Result<(), SoundError> {
        match self.conn.as_mut() {
            Some(conn) => silence(conn),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), SoundError> {
        if self.conn.take().is_some() {
            info!(dest = ?self.dest, "closed ALSA sequencer client");
        }
        Ok(())
    }
}

#[cfg(all(feature = "alsa", target_os = "linux"))]
pub use self::linux::{list_destination_ports, AlsaConnection};

#[cfg(all(feature = "alsa", target_os = "linux"))]
mod linux {
    use std::ffi::CString;

    use alsa::seq::{
        Addr, ClientIter, EvCtrl, EvNote, EvQueueControl, Event, EventType, PortCap, PortInfo,
        PortIter, PortSubscribe, PortType, QueueTempo, Seq,
    };
    use alsa::Direction;
    use tracing::info;

    use super::{DestinationPort, SeqConnection, SeqMessage};
    use crate::error::SoundError;

    const CLIENT_NAME: &str = "soundcard";
    const ALL_NOTES_OFF: u32 = 123;

    fn connection_error(context: &str, e: impl std::fmt::Display) -> SoundError {
        SoundError::Connection {
            message: format!("{}: {}", context, e),
        }
    }

    fn cstring(s: &str) -> Result<CString, SoundError> {
        CString::new(s).map_err(|e| connection_error("invalid name", e))
    }

    fn open_seq() -> Result<Seq, SoundError> {
        let seq = Seq::open(None, Some(Direction::Playback), true)
            .map_err(|e| connection_error("open sequencer", e))?;
        seq.set_client_name(&cstring(CLIENT_NAME)?)
            .map_err(|e| connection_error("set client name", e))?;
        Ok(seq)
    }

    pub struct AlsaConnection {
        seq: Seq,
        port: i32,
        queue: i32,
        dest: Addr,
    }

    impl AlsaConnection {
        pub fn open(dest: (i32, i32), verbose_init: bool) -> Result<Self, SoundError> {
            let seq = open_seq()?;
            let name = cstring(CLIENT_NAME)?;
            let port = seq
                .create_simple_port(
                    &name,
                    PortCap::empty(),
                    PortType::MIDI_GENERIC | PortType::APPLICATION,
                )
                .map_err(|e| connection_error("create port", e))?;
            let queue = seq
                .alloc_named_queue(&name)
                .map_err(|e| connection_error("create queue", e))?;
            let client = seq.client_id().map_err(|e| connection_error("client id", e))?;
            let dest = Addr {
                client: dest.0,
                port: dest.1,
            };
            let subs = PortSubscribe::empty().map_err(|e| connection_error("subscribe", e))?;
            subs.set_sender(Addr { client, port });
            subs.set_dest(dest);
            seq.subscribe_port(&subs)
                .map_err(|e| connection_error("connect ports", e))?;
            if verbose_init {
                info!(client, port, queue, dest = ?(dest.client, dest.port), "ALSA sequencer client ready");
            }
            Ok(AlsaConnection { seq, port, queue, dest })
        }

        fn control_queue(&self, event: EventType) -> Result<(), SoundError> {
            self.seq
                .control_queue(self.queue, event, 0, None)
                .map_err(|e| connection_error("control queue", e))?;
            Ok(())
        }

        fn message_event(&self, message: SeqMessage) -> Event<'static> {
            let mut event = match message {
                SeqMessage::ProgramChange { channel, program } => Event::new(
                    EventType::Pgmchange,
                    &EvCtrl {
                        channel,
                        param: 0,
                        value: program as i32,
                    },
                ),
                SeqMessage::NoteOn { channel, note, velocity } => Event::new(
                    EventType::Noteon,
                    &EvNote {
                        channel,
                        note,
                        velocity,
                        off_velocity: 0,
                        duration: 0,
                    },
                ),
                SeqMessage::NoteOff { channel, note, velocity } => Event::new(
                    EventType::Noteoff,
                    &EvNote {
                        channel,
                        note,
                        velocity,
                        off_velocity: 0,
                        duration: 0,
                    },
                ),
                SeqMessage::Tempo(tempo) => Event::new(
                    EventType::Tempo,
                    &EvQueueControl {
                        queue: self.queue,
                        value: tempo as i32,
                    },
                ),
                SeqMessage::Stop => Event::new(
                    EventType::Stop,
                    &EvQueueControl {
                        queue: self.queue,
                        value: (),
                    },
                ),
                SeqMessage::AllNotesOff { channel } => Event::new(
                    EventType::Controller,
                    &EvCtrl {
                        channel,
                        param: ALL_NOTES_OFF,
                        value: 0,
                    },
                ),
            };
            match message {
                SeqMessage::Tempo(_) | SeqMessage::Stop => event.set_dest(Addr::system_timer()),
                _ => event.set_dest(self.dest),
            }
            event.set_source(self.port);
            event
        }
    }

    impl SeqConnection for AlsaConnection {
        fn set_queue_tempo(&mut self, tempo: u32) -> Result<(), SoundError> {
            let qt = QueueTempo::empty().map_err(|e| connection_error("queue tempo", e))?;
            qt.set_tempo(tempo);
            qt.set_ppq(96);
            self.seq
                .set_queue_tempo(self.queue, &qt)
                .map_err(|e| connection_error("queue tempo", e))
        }

        fn start_queue(&mut self) -> Result<(), SoundError> {
            self.control_queue(EventType::Start)
        }

        fn stop_queue(&mut self) -> Result<(), SoundError> {
            self.control_queue(EventType::Stop)
        }

        fn schedule(&mut self, tick: u32, message: SeqMessage) -> Result<(), SoundError> {
            let mut event = self.message_event(message);
            event.schedule_tick(self.queue, false, tick);
            self.seq
                .event_output(&mut event)
                .map_err(|e| connection_error("output event", e))?;
            Ok(())
        }

        fn drain(&mut self) -> Result<(), SoundError> {
            self.seq
                .drain_output()
                .map_err(|e| connection_error("drain output", e))?;
            Ok(())
        }

        fn drop_pending(&mut self) -> Result<(), SoundError> {
            // also removes our events from the kernel queue
            self.seq
                .drop_output()
                .map_err(|e| connection_error("drop output", e))
        }

        fn send_now(&mut self, message: SeqMessage) -> Result<(), SoundError> {
            let mut event = self.message_event(message);
            event.set_direct();
            self.seq
                .event_output_direct(&mut event)
                .map_err(|e| connection_error("send event", e))?;
            Ok(())
        }
    }

    fn is_destination(info: &PortInfo) -> bool {
        let ty = info.get_type();
        let caps = info.get_capability();
        (ty.contains(PortType::MIDI_GENERIC) || ty.contains(PortType::APPLICATION))
            && caps.intersects(PortCap::WRITE | PortCap::SUBS_WRITE)
    }

    /// All ports that accept MIDI events from other clients.
    pub fn list_destination_ports() -> Result<Vec<DestinationPort>, SoundError> {
        let seq = open_seq()?;
        let mut ports = Vec::new();
        for client in ClientIter::new(&seq) {
            let client_name = client.get_name().unwrap_or_default().to_string();
            for info in PortIter::new(&seq, client.get_client()) {
                if !is_destination(&info) {
                    continue;
                }
                ports.push(DestinationPort {
                    client: client.get_client(),
                    port: info.get_port(),
                    client_name: client_name.clone(),
                    port_name: info.get_name().unwrap_or_default().to_string(),
                });
            }
        }
        Ok(ports)
    }
}
