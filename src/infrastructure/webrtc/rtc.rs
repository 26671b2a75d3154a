//! webrtc-rs backed peer connections

use super::{ConnectionObserver, PeerConnection, PeerConnectionFactory, PeerError};
use crate::domain::connection::{ConnectionSignal, ConnectionState};
use crate::domain::media::{MediaKind, MediaTrack, TrackSettings};
use crate::domain::signaling::{IceCandidate, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

/// Builds STUN-only peer connections with default codecs and interceptors
#[derive(Debug, Default, Clone)]
pub struct RtcPeerFactory;

impl RtcPeerFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcPeerFactory {
    async fn create(
        &self,
        ice_servers: &[String],
        observer: ConnectionObserver,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| PeerError::Create(format!("Failed to register codecs: {}", e)))?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| PeerError::Create(format!("Failed to register interceptors: {}", e)))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| PeerError::Create(e.to_string()))?,
        );

        let state_observer = observer.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            debug!("Peer connection state changed: {}", s);
            if let Some(state) = map_state(s) {
                state_observer(ConnectionSignal::StateChanged(state));
            }
            Box::pin(async {})
        }));

        let candidate_observer = observer.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let observer = candidate_observer.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => observer(ConnectionSignal::LocalCandidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                    })),
                    Err(e) => warn!("Failed to serialize local ICE candidate: {}", e),
                }
            })
        }));

        let track_observer = observer;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => MediaKind::Audio,
                    _ => MediaKind::Video,
                };
                let stream_id = track.stream_id();
                info!("Remote {} track received on stream {}", kind.as_str(), stream_id);
                track_observer(ConnectionSignal::RemoteTrack {
                    stream_id,
                    track: MediaTrack::with_id(
                        track.id(),
                        kind,
                        format!("remote {}", kind.as_str()),
                        TrackSettings::default(),
                    ),
                });
                Box::pin(async {})
            },
        ));

        Ok(Arc::new(RtcPeerConnection { pc }))
    }
}

struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
}

impl RtcPeerConnection {
    async fn local_description(&self) -> Result<RTCSessionDescription, PeerError> {
        self.pc
            .local_description()
            .await
            .ok_or_else(|| PeerError::Sdp("No local description after applying it".to_string()))
    }
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> Result<(), PeerError> {
        let mime_type = match track.kind() {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_string(),
            stream_id.to_string(),
        ));

        let sender = self
            .pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| PeerError::Track(e.to_string()))?;

        // RTCP has to be drained for interceptors to work
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, PeerError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to create offer: {}", e)))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to set local description: {}", e)))?;

        Ok(SessionDescription::offer(self.local_description().await?.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to create answer: {}", e)))?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to set local description: {}", e)))?;

        Ok(SessionDescription::answer(self.local_description().await?.sdp))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), PeerError> {
        let remote = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(|e| PeerError::Sdp(format!("Invalid session description: {}", e)))?;

        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| PeerError::Sdp(format!("Failed to set remote description: {}", e)))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await
            .map_err(|e| PeerError::Ice(e.to_string()))
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.pc
            .close()
            .await
            .map_err(|e| PeerError::Close(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn silent_observer() -> ConnectionObserver {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn test_offer_answer_between_local_connections() {
        let factory = RtcPeerFactory::new();
        let caller = factory.create(&[], silent_observer()).await.unwrap();
        let callee = factory.create(&[], silent_observer()).await.unwrap();

        let audio = MediaTrack::new(MediaKind::Audio, "mic", TrackSettings::default());
        let video = MediaTrack::new(MediaKind::Video, "camera", TrackSettings::default());
        caller.add_track(&audio, "local").await.unwrap();
        caller.add_track(&video, "local").await.unwrap();

        let offer = caller.create_offer().await.unwrap();
        assert_eq!(offer.kind, SdpKind::Offer);
        assert!(offer.sdp.contains("m=audio"));
        assert!(offer.sdp.contains("m=video"));

        callee.set_remote_description(offer).await.unwrap();
        let answer = callee.create_answer().await.unwrap();
        assert_eq!(answer.kind, SdpKind::Answer);
        caller.set_remote_description(answer).await.unwrap();

        caller.close().await.unwrap();
        callee.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_candidate_before_remote_description_fails() {
        let connection = RtcPeerFactory::new()
            .create(&[], silent_observer())
            .await
            .unwrap();

        let result = connection
            .add_ice_candidate(IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.1 50000 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            })
            .await;

        assert!(matches!(result, Err(PeerError::Ice(_))));
        connection.close().await.unwrap();
    }
}
