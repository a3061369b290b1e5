use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::lobby::RoomSummary;
use crate::member::{ConnectionId, UserId, UserIdentity};
use crate::room::{PlaybackPatch, RoomSnapshot};

/// Events a client may send. Wire form: `{"event": "<name>", "data": {..}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    JoinLobby,
    JoinRoom(JoinRoomMsg),
    LeaveRoom(LeaveRoomMsg),
    SyncVideo(SyncVideoMsg),
    RespondSync(RespondSyncMsg),
    VoiceJoin(VoiceJoinMsg),
    VoiceLeave(VoiceLeaveMsg),
    VoiceOffer(VoiceRelayMsg),
    VoiceAnswer(VoiceRelayMsg),
    VoiceIceCandidate(VoiceRelayMsg),
    VoiceMute(VoiceMuteMsg),
}

impl ClientEvent {
    /// Wire name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinLobby => "join-lobby",
            Self::JoinRoom(_) => "join-room",
            Self::LeaveRoom(_) => "leave-room",
            Self::SyncVideo(_) => "sync-video",
            Self::RespondSync(_) => "respond-sync",
            Self::VoiceJoin(_) => "voice-join",
            Self::VoiceLeave(_) => "voice-leave",
            Self::VoiceOffer(_) => "voice-offer",
            Self::VoiceAnswer(_) => "voice-answer",
            Self::VoiceIceCandidate(_) => "voice-ice-candidate",
            Self::VoiceMute(_) => "voice-mute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomMsg {
    pub room_code: String,
    pub user: UserIdentity,
    /// Create the room if it does not exist yet.
    #[serde(default)]
    pub create: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomMsg {
    pub room_code: String,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncVideoMsg {
    pub room_code: String,
    pub state: PlaybackPatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondSyncMsg {
    pub requester_id: ConnectionId,
    pub state: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceJoinMsg {
    pub room_code: String,
    pub user: UserIdentity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceLeaveMsg {
    pub room_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// Directed WebRTC signaling payload (offer, answer or ICE candidate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceRelayMsg {
    pub room_code: String,
    #[serde(alias = "targetConnectionId")]
    pub target_socket_id: ConnectionId,
    #[serde(default, alias = "offer", alias = "answer", alias = "candidate")]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMuteMsg {
    pub room_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    pub is_muted: bool,
}

/// Events the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    RoomUpdate(RoomSnapshot),
    RequestSync(RequestSyncMsg),
    /// Merged room state, or a host's catch-up state relayed verbatim.
    SyncVideo(Value),
    SystemMessage(SystemMessageMsg),
    Error(ErrorMsg),
    OnlineCount(usize),
    LobbyUpdate(LobbyUpdateMsg),
    VoiceUserJoined(VoiceUserJoinedMsg),
    VoiceMembers(VoiceMembersMsg),
    VoiceUserLeft(VoiceUserLeftMsg),
    VoiceMuteChanged(VoiceMuteChangedMsg),
    VoiceStatusUpdate(VoiceStatusMsg),
    VoiceOffer(VoiceForwardMsg),
    VoiceAnswer(VoiceForwardMsg),
    VoiceIceCandidate(VoiceForwardMsg),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSyncMsg {
    pub requester_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMessageMsg {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<UserId>,
}

/// Error codes carried by the `error` event.
pub mod error_code {
    pub const ROOM_NOT_FOUND: &str = "room-not-found";
    pub const INVALID_ROOM_CODE: &str = "invalid-room-code";
    pub const UNAVAILABLE: &str = "unavailable";
    pub const BAD_REQUEST: &str = "bad-request";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMsg {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyUpdateMsg {
    pub rooms: Vec<RoomSummary>,
    pub online_count: usize,
}

/// Who a voice peer is, as shown to other peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceIdentity {
    pub user_id: UserId,
    pub display_name: String,
}

/// One row of a room's voice presence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMember {
    pub connection_id: ConnectionId,
    pub user_id: UserId,
    pub display_name: String,
    pub is_muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceUserJoinedMsg {
    pub user: VoiceIdentity,
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMembersMsg {
    pub members: Vec<VoiceMember>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceUserLeftMsg {
    pub connection_id: ConnectionId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceMuteChangedMsg {
    pub connection_id: ConnectionId,
    pub is_muted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStatusMsg {
    pub voice_members: Vec<VoiceMember>,
}

/// A signaling payload forwarded to its target, stamped with the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceForwardMsg {
    pub payload: Value,
    pub from_connection_id: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<VoiceIdentity>,
}
