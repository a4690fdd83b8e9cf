//! Network listeners: one task per enabled service, TCP accept loops and UDP
//! receive loops, each dispatching bounded concurrent sessions. A failed bind
//! skips that service; the manager only fails if nothing binds at all.

use crate::config::Config;
use crate::error::NetlureError;
use crate::event::EventPipeline;
use crate::metrics::{record_refused, record_tcp_session, record_udp_datagram, record_bytes_in};
use crate::protocol::DatagramHandler;
use crate::service::{self, Service, Transport};
use crate::session::{self, SessionLimits};
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, Semaphore};
use tracing::{error, info, warn};

pub struct Listeners {
    cfg: Config,
    services: Vec<Service>,
    pipeline: EventPipeline,
    shutdown: broadcast::Receiver<()>,
}

impl Listeners {
    pub fn new(cfg: Config, pipeline: EventPipeline, shutdown: broadcast::Receiver<()>) -> Result<Self> {
        let services = service::resolve(&cfg.services)?;
        Ok(Self { cfg, services, pipeline, shutdown })
    }

    pub fn limits(&self) -> SessionLimits {
        SessionLimits {
            idle_timeout: Duration::from_secs(self.cfg.idle_timeout_seconds),
            max_lifetime: Duration::from_secs(self.cfg.session_max_seconds),
            max_input_bytes: self.cfg.max_input_bytes,
            max_login_attempts: self.cfg.max_login_attempts,
            max_amplification_ratio: self.cfg.max_amplification_ratio,
        }
    }

    /// Bind every enabled service and run until shutdown. Fatal only when
    /// zero services bind.
    pub async fn run(&self) -> Result<()> {
        let limits = self.limits();
        let mut handles = Vec::new();
        let mut bound = 0usize;

        for svc in &self.services {
            let addr = format!("{}:{}", self.cfg.listen_addr, svc.port);
            match svc.transport {
                Transport::Udp => {
                    let sock = match UdpSocket::bind(&addr).await {
                        Ok(s) => s,
                        Err(e) => {
                            warn!(service = %svc.protocol, error = %NetlureError::Bind {
                                transport: svc.transport,
                                port: svc.port,
                                source: e,
                            }, "skipping service");
                            continue;
                        }
                    };
                    bound += 1;
                    info!(protocol = %svc.protocol, transport = "udp", %addr, "listening");
                    handles.push(self.spawn_udp(sock, svc.clone(), limits));
                }
                Transport::Tcp => {
                    let listener = match TcpListener::bind(&addr).await {
                        Ok(l) => l,
                        Err(e) => {
                            warn!(service = %svc.protocol, error = %NetlureError::Bind {
                                transport: svc.transport,
                                port: svc.port,
                                source: e,
                            }, "skipping service");
                            continue;
                        }
                    };
                    bound += 1;
                    info!(protocol = %svc.protocol, transport = "tcp", %addr, "listening");
                    handles.push(self.spawn_tcp(listener, svc.clone(), limits));
                }
            }
        }

        if bound == 0 {
            bail!("no services bound; nothing to emulate");
        }
        for h in handles {
            let _ = h.await;
        }
        Ok(())
    }

    fn spawn_tcp(
        &self,
        listener: TcpListener,
        svc: Service,
        limits: SessionLimits,
    ) -> tokio::task::JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        let mut shutdown_rx = self.shutdown.resubscribe();
        let sessions = Arc::new(Semaphore::new(self.cfg.max_sessions_per_service));
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    res = listener.accept() => match res {
                        Ok((stream, peer)) => {
                            // Excess connections are refused at accept, never queued.
                            let Ok(permit) = sessions.clone().try_acquire_owned() else {
                                record_refused(&pipeline.metrics);
                                drop(stream);
                                continue;
                            };
                            record_tcp_session(&pipeline.metrics);
                            let pipeline = pipeline.clone();
                            let svc = svc.clone();
                            tokio::spawn(async move {
                                session::run_tcp_session(stream, peer, svc, limits, pipeline).await;
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            error!(port = svc.port, error = ?e, "accept error");
                            break;
                        }
                    }
                }
            }
        })
    }

    fn spawn_udp(
        &self,
        sock: UdpSocket,
        svc: Service,
        limits: SessionLimits,
    ) -> tokio::task::JoinHandle<()> {
        let pipeline = self.pipeline.clone();
        let mut shutdown_rx = self.shutdown.resubscribe();
        let sessions = Arc::new(Semaphore::new(self.cfg.max_sessions_per_service));
        let sock = Arc::new(sock);
        tokio::spawn(async move {
            let handler = Arc::new(DatagramHandler::new(svc.protocol));
            let mut buf = vec![0u8; limits.max_input_bytes.max(512)];
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    res = sock.recv_from(&mut buf) => match res {
                        Ok((n, peer)) => {
                            if n == 0 { continue; }
                            record_udp_datagram(&pipeline.metrics);
                            record_bytes_in(&pipeline.metrics, n);
                            let Ok(permit) = sessions.clone().try_acquire_owned() else {
                                record_refused(&pipeline.metrics);
                                continue;
                            };
                            let payload = buf[..n].to_vec();
                            let pipeline = pipeline.clone();
                            let svc = svc.clone();
                            let handler = handler.clone();
                            let sock = sock.clone();
                            tokio::spawn(async move {
                                let reply = session::handle_datagram(
                                    &handler, &payload, peer, &svc, limits, &pipeline,
                                )
                                .await;
                                if let Some(r) = reply {
                                    let _ = sock.send_to(&r, peer).await;
                                }
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            error!(port = svc.port, error = ?e, "recv error");
                            break;
                        }
                    }
                }
            }
        })
    }
}
