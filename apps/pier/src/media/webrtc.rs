use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use pier_protocol::{IceCandidate, SessionDescription};
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::{DataPipe, MediaError, MediaEvent, MediaEventSink, MediaTransport, MediaTransportFactory};
use crate::config::Config;
use crate::session::ConnectivityState;

/// Builds one webrtc-rs peer connection per negotiation.
#[derive(Debug, Clone)]
pub struct WebRtcMediaFactory {
    ice_servers: Vec<String>,
    ordered: bool,
}

impl WebRtcMediaFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            ice_servers: config.ice_servers.clone(),
            ordered: config.ordered,
        }
    }
}

#[async_trait]
impl MediaTransportFactory for WebRtcMediaFactory {
    async fn create(&self, events: MediaEventSink) -> Result<Arc<dyn MediaTransport>, MediaError> {
        let api = APIBuilder::new().build();
        let rtc_config = RTCConfiguration {
            ice_servers: rtc_ice_servers(&self.ice_servers),
            ..Default::default()
        };
        let peer_connection = Arc::new(
            api.new_peer_connection(rtc_config)
                .await
                .map_err(|err| MediaError::Setup(err.to_string()))?,
        );
        register_peer_callbacks(&peer_connection, &events);
        tracing::debug!(
            target: "pier::media",
            generation = events.generation(),
            ice_servers = self.ice_servers.len(),
            "peer connection created"
        );
        Ok(Arc::new(WebRtcMediaTransport {
            peer_connection,
            events,
            ordered: self.ordered,
        }))
    }
}

fn rtc_ice_servers(urls: &[String]) -> Vec<RTCIceServer> {
    if urls.is_empty() {
        return Vec::new();
    }
    vec![RTCIceServer {
        urls: urls.to_vec(),
        ..Default::default()
    }]
}

fn register_peer_callbacks(peer_connection: &Arc<RTCPeerConnection>, events: &MediaEventSink) {
    let sink = events.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let sink = sink.clone();
        Box::pin(async move {
            // None marks the end of gathering.
            let Some(candidate) = candidate else {
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    tracing::trace!(target: "pier::media", candidate = %init.candidate, "local candidate");
                    sink.emit(MediaEvent::LocalCandidate(wire_candidate(init)));
                }
                Err(err) => {
                    tracing::warn!(target: "pier::media", error = %err, "failed to serialize local candidate")
                }
            }
        })
    }));

    let sink = events.clone();
    peer_connection.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let sink = sink.clone();
        Box::pin(async move {
            tracing::debug!(target: "pier::media", ?state, "ice connection state changed");
            if let Some(connectivity) = connectivity_from_ice(state) {
                sink.emit(MediaEvent::Connectivity(connectivity));
            }
        })
    }));

    let sink = events.clone();
    peer_connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
        let sink = sink.clone();
        Box::pin(async move {
            tracing::debug!(target: "pier::media", label = channel.label(), "remote data channel received");
            let pipe = WebRtcDataPipe::attach(channel, &sink);
            sink.emit(MediaEvent::DataPipe(Arc::new(pipe)));
        })
    }));
}

fn connectivity_from_ice(state: RTCIceConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCIceConnectionState::New => Some(ConnectivityState::New),
        RTCIceConnectionState::Checking => Some(ConnectivityState::Connecting),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(ConnectivityState::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCIceConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCIceConnectionState::Closed => Some(ConnectivityState::Closed),
        _ => None,
    }
}

fn wire_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
        ..IceCandidate::default()
    }
}

fn rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn wire_description(description: &RTCSessionDescription) -> SessionDescription {
    SessionDescription {
        kind: description.sdp_type.to_string(),
        sdp: description.sdp.clone(),
        ..SessionDescription::default()
    }
}

fn rtc_description(
    description: SessionDescription,
    side: &'static str,
) -> Result<RTCSessionDescription, MediaError> {
    let invalid = |reason: String| MediaError::Description { side, reason };
    let parsed = match RTCSdpType::from(description.kind.as_str()) {
        RTCSdpType::Offer => RTCSessionDescription::offer(description.sdp),
        RTCSdpType::Answer => RTCSessionDescription::answer(description.sdp),
        RTCSdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        _ => {
            return Err(invalid(format!(
                "unsupported description type {:?}",
                description.kind
            )));
        }
    };
    parsed.map_err(|err| invalid(err.to_string()))
}

pub struct WebRtcMediaTransport {
    peer_connection: Arc<RTCPeerConnection>,
    events: MediaEventSink,
    ordered: bool,
}

impl fmt::Debug for WebRtcMediaTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcMediaTransport")
            .field("generation", &self.events.generation())
            .field("ordered", &self.ordered)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl MediaTransport for WebRtcMediaTransport {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|err| MediaError::Offer(err.to_string()))?;
        Ok(wire_description(&offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|err| MediaError::Answer(err.to_string()))?;
        Ok(wire_description(&answer))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let description = rtc_description(description, "local")?;
        self.peer_connection
            .set_local_description(description)
            .await
            .map_err(|err| MediaError::Description {
                side: "local",
                reason: err.to_string(),
            })
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError> {
        let description = rtc_description(description, "remote")?;
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|err| MediaError::Description {
                side: "remote",
                reason: err.to_string(),
            })
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError> {
        self.peer_connection
            .add_ice_candidate(rtc_candidate(candidate))
            .await
            .map_err(|err| MediaError::Candidate(err.to_string()))
    }

    async fn create_data_pipe(&self, label: &str) -> Result<Arc<dyn DataPipe>, MediaError> {
        let init = RTCDataChannelInit {
            ordered: Some(self.ordered),
            ..Default::default()
        };
        let channel = self
            .peer_connection
            .create_data_channel(label, Some(init))
            .await
            .map_err(|err| MediaError::DataPipe(err.to_string()))?;
        Ok(Arc::new(WebRtcDataPipe::attach(channel, &self.events)))
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.peer_connection
            .close()
            .await
            .map_err(|err| MediaError::Setup(format!("close failed: {err}")))
    }
}

pub struct WebRtcDataPipe {
    label: String,
    channel: Arc<RTCDataChannel>,
}

impl WebRtcDataPipe {
    fn attach(channel: Arc<RTCDataChannel>, events: &MediaEventSink) -> Self {
        let label = channel.label().to_string();

        let (sink, open_label) = (events.clone(), label.clone());
        channel.on_open(Box::new(move || {
            let sink = sink.clone();
            let label = open_label.clone();
            Box::pin(async move {
                sink.emit(MediaEvent::PipeOpen { label });
            })
        }));

        let (sink, message_label) = (events.clone(), label.clone());
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let sink = sink.clone();
            let label = message_label.clone();
            Box::pin(async move {
                let text = String::from_utf8_lossy(&msg.data).into_owned();
                sink.emit(MediaEvent::PipeMessage { label, text });
            })
        }));

        let (sink, close_label) = (events.clone(), label.clone());
        channel.on_close(Box::new(move || {
            let sink = sink.clone();
            let label = close_label.clone();
            Box::pin(async move {
                sink.emit(MediaEvent::PipeClosed { label });
            })
        }));

        let (sink, error_label) = (events.clone(), label.clone());
        channel.on_error(Box::new(move |err: webrtc::Error| {
            let sink = sink.clone();
            let label = error_label.clone();
            Box::pin(async move {
                sink.emit(MediaEvent::PipeError {
                    label,
                    reason: err.to_string(),
                });
            })
        }));

        Self { label, channel }
    }
}

impl fmt::Debug for WebRtcDataPipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebRtcDataPipe")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DataPipe for WebRtcDataPipe {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: &str) -> Result<(), MediaError> {
        self.channel
            .send_text(text.to_string())
            .await
            .map(|_| ())
            .map_err(|err| MediaError::DataPipe(err.to_string()))
    }

    async fn close(&self) -> Result<(), MediaError> {
        self.channel
            .close()
            .await
            .map_err(|err| MediaError::DataPipe(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ice_states_map_onto_connectivity() {
        assert_eq!(
            connectivity_from_ice(RTCIceConnectionState::Checking),
            Some(ConnectivityState::Connecting)
        );
        assert_eq!(
            connectivity_from_ice(RTCIceConnectionState::Completed),
            Some(ConnectivityState::Connected)
        );
        assert_eq!(
            connectivity_from_ice(RTCIceConnectionState::Failed),
            Some(ConnectivityState::Failed)
        );
        assert_eq!(connectivity_from_ice(RTCIceConnectionState::Unspecified), None);
    }

    #[test]
    fn rollback_descriptions_are_rejected() {
        let rollback = SessionDescription {
            kind: "rollback".into(),
            ..SessionDescription::default()
        };
        assert!(matches!(
            rtc_description(rollback, "local"),
            Err(MediaError::Description { side: "local", .. })
        ));
    }

    #[test]
    fn empty_ice_list_means_host_candidates_only() {
        assert!(rtc_ice_servers(&[]).is_empty());
        let servers = rtc_ice_servers(&["stun:stun.example:3478".to_string()]);
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].urls, vec!["stun:stun.example:3478".to_string()]);
    }
}
