//! Binary-star redundant expiry service: a primary/backup pair answering
//! whether a metatile has been marked expired. The state machine and the
//! fragment packing are pure and unit-tested; [`reactor`] and [`client`]
//! wire them to real 0MQ sockets.

pub mod client;
pub mod frag;
pub mod reactor;

use std::collections::{HashMap, HashSet};

use rendermq_proto::Job;

/// Role/liveness state in the binary-star pattern, numbered to match the
/// wire encoding used for heartbeats between primary and backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmState {
    Primary = 1,
    Backup = 2,
    Active = 3,
    Passive = 4,
}

impl FsmState {
    pub fn from_u32(value: u32) -> Option<FsmState> {
        match value {
            1 => Some(FsmState::Primary),
            2 => Some(FsmState::Backup),
            3 => Some(FsmState::Active),
            4 => Some(FsmState::Passive),
            _ => None,
        }
    }
}

/// An event driving the state machine: either a peer heartbeat announcing
/// its own state, or a client request arriving on this server's frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    PeerPrimary,
    PeerBackup,
    PeerActive,
    PeerPassive,
    ClientRequest,
}

/// The binary-star finite state machine from the 0MQ guide: two servers,
/// started as `Primary`/`Backup`, negotiate which becomes `Active` purely by
/// exchanging heartbeats, and the `Passive` one takes over if the peer's
/// heartbeat goes silent for longer than `peer_expiry`.
pub struct Fsm {
    state: FsmState,
    peer_expiry_secs: i64,
}

impl Fsm {
    pub fn new(initial: FsmState) -> Fsm {
        Fsm { state: initial, peer_expiry_secs: 0 }
    }

    pub fn state(&self) -> FsmState {
        self.state
    }

    /// Applies `event`, returning `false` if it's a fatal conflict (both
    /// sides think they're active, or both think they're passive) that
    /// should terminate the server.
    pub fn event(&mut self, event: Event, now: i64, heartbeat_secs: i64) -> bool {
        let mut ok = true;

        match (self.state, event) {
            (FsmState::Primary, Event::PeerBackup) => self.state = FsmState::Active,
            (FsmState::Primary, Event::PeerActive) => self.state = FsmState::Passive,
            (FsmState::Backup, Event::PeerActive) => self.state = FsmState::Passive,
            (FsmState::Backup, Event::ClientRequest) => ok = false,
            (FsmState::Active, Event::PeerActive) => ok = false,
            (FsmState::Passive, Event::PeerPrimary) => self.state = FsmState::Active,
            (FsmState::Passive, Event::PeerBackup) => self.state = FsmState::Active,
            (FsmState::Passive, Event::PeerPassive) => ok = false,
            (FsmState::Passive, Event::ClientRequest) => {
                if now >= self.peer_expiry_secs {
                    self.state = FsmState::Active;
                } else {
                    ok = false;
                }
            }
            _ => {}
        }

        if ok && event != Event::ClientRequest {
            self.peer_expiry_secs = now + 2 * heartbeat_secs;
        }
        ok
    }
}

/// A style+format pair identifying one of the sparse expiry sets, grounded
/// in the original's `style_and_format` key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StyleFormat {
    style: String,
    format: u8,
}

/// The set of expired metatile fragments, one sparse set per style/format.
#[derive(Default)]
pub struct ExpiryData {
    sets: HashMap<StyleFormat, HashSet<u32>>,
}

impl ExpiryData {
    pub fn new() -> ExpiryData {
        ExpiryData::default()
    }

    pub fn lookup(&self, job: &Job) -> bool {
        let key = key_for(job);
        self.sets.get(&key).is_some_and(|set| set.contains(&frag::tile_to_frag(job)))
    }

    pub fn insert(&mut self, job: &Job) {
        self.sets.entry(key_for(job)).or_default().insert(frag::tile_to_frag(job));
    }

    pub fn erase(&mut self, job: &Job) {
        if let Some(set) = self.sets.get_mut(&key_for(job)) {
            set.remove(&frag::tile_to_frag(job));
        }
    }
}

fn key_for(job: &Job) -> StyleFormat {
    StyleFormat { style: job.style.clone(), format: job.format.bits() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_and_backup_settle_into_active_and_passive() {
        let mut primary = Fsm::new(FsmState::Primary);
        let mut backup = Fsm::new(FsmState::Backup);

        assert!(primary.event(Event::PeerBackup, 0, 1));
        assert!(backup.event(Event::PeerActive, 0, 1));

        assert_eq!(primary.state(), FsmState::Active);
        assert_eq!(backup.state(), FsmState::Passive);
    }

    #[test]
    fn two_actives_is_a_fatal_conflict() {
        let mut active = Fsm::new(FsmState::Active);
        assert!(!active.event(Event::PeerActive, 0, 1));
    }

    #[test]
    fn two_passives_is_a_fatal_conflict() {
        let mut passive = Fsm::new(FsmState::Passive);
        assert!(!passive.event(Event::PeerPassive, 0, 1));
    }

    #[test]
    fn passive_rejects_client_requests_before_peer_expiry() {
        let mut passive = Fsm::new(FsmState::Passive);
        passive.event(Event::PeerActive, 0, 10);
        assert!(!passive.event(Event::ClientRequest, 5, 10));
        assert_eq!(passive.state(), FsmState::Passive);
    }

    #[test]
    fn passive_fails_over_to_active_once_peer_expiry_elapses() {
        let mut passive = Fsm::new(FsmState::Passive);
        passive.event(Event::PeerActive, 0, 10);
        assert!(passive.event(Event::ClientRequest, 20, 10));
        assert_eq!(passive.state(), FsmState::Active);
    }

    #[test]
    fn backup_rejects_unexpected_client_requests() {
        let mut backup = Fsm::new(FsmState::Backup);
        assert!(!backup.event(Event::ClientRequest, 0, 1));
    }

    #[test]
    fn expiry_data_roundtrips_insert_lookup_erase() {
        use rendermq_proto::{Format, Status};
        let mut data = ExpiryData::new();
        let tile = Job::new(Status::Dirty, 16, 24, 12, 1, "osm", Format::PNG);

        assert!(!data.lookup(&tile));
        data.insert(&tile);
        assert!(data.lookup(&tile));
        data.erase(&tile);
        assert!(!data.lookup(&tile));
    }

    #[test]
    fn expiry_is_scoped_per_style_and_format() {
        use rendermq_proto::{Format, Status};
        let mut data = ExpiryData::new();
        let png = Job::new(Status::Dirty, 16, 24, 12, 1, "osm", Format::PNG);
        let jpeg = Job::new(Status::Dirty, 16, 24, 12, 1, "osm", Format::JPEG);

        data.insert(&png);
        assert!(data.lookup(&png));
        assert!(!data.lookup(&jpeg));
    }
}
