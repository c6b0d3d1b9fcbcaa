// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::network::consts::{
    DEFAULT_DRIVER_TICK, DEFAULT_HANDSHAKE_RETRIES, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MSL, DEFAULT_MSS,
    DEFAULT_RECV_RING_SIZE, DEFAULT_SEND_RING_SIZE, MAX_MSS, MIN_MSS,
};
use ::std::time::Duration;

//==============================================================================
// Structures
//==============================================================================

/// TCP Configuration Descriptor
#[derive(Clone, Debug)]
pub struct TcpConfig {
    /// Advertised Maximum Segment Size
    advertised_mss: usize,
    /// Number of Retries for TCP Handshake Algorithm
    handshake_retries: usize,
    /// Timeout for TCP Handshake Algorithm
    handshake_timeout: Duration,
    /// Capacity of the per-endpoint receive ring
    recv_ring_size: usize,
    /// Capacity of the per-endpoint send ring
    send_ring_size: usize,
    /// Delay between background driver passes
    driver_tick: Duration,
    /// Maximum Segment Lifetime
    msl: Duration,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for TCP Configuration Descriptor
impl TcpConfig {
    /// Gets the advertised maximum segment size in the target [TcpConfig].
    pub fn get_advertised_mss(&self) -> usize {
        self.advertised_mss
    }

    /// Gets the number of TCP handshake retries in the target [TcpConfig].
    pub fn get_handshake_retries(&self) -> usize {
        self.handshake_retries
    }

    /// Gets the handshake TCP timeout in the target [TcpConfig].
    pub fn get_handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Gets the receive ring capacity in the target [TcpConfig].
    pub fn get_recv_ring_size(&self) -> usize {
        self.recv_ring_size
    }

    /// Gets the send ring capacity in the target [TcpConfig].
    pub fn get_send_ring_size(&self) -> usize {
        self.send_ring_size
    }

    /// Gets the background driver tick in the target [TcpConfig].
    pub fn get_driver_tick(&self) -> Duration {
        self.driver_tick
    }

    /// Gets the maximum segment lifetime in the target [TcpConfig].
    pub fn get_msl(&self) -> Duration {
        self.msl
    }

    /// Sets the advertised maximum segment size in the target [TcpConfig].
    pub fn set_advertised_mss(mut self, value: usize) -> Self {
        assert!(value >= MIN_MSS);
        assert!(value <= MAX_MSS);
        self.advertised_mss = value;
        self
    }

    /// Sets the number of TCP handshake retries in the target [TcpConfig].
    pub fn set_handshake_retries(mut self, value: usize) -> Self {
        assert!(value > 0);
        self.handshake_retries = value;
        self
    }

    /// Sets the handshake TCP timeout in the target [TcpConfig].
    pub fn set_handshake_timeout(mut self, value: Duration) -> Self {
        assert!(value > Duration::ZERO);
        self.handshake_timeout = value;
        self
    }

    /// Sets the receive ring capacity in the target [TcpConfig].
    pub fn set_recv_ring_size(mut self, value: usize) -> Self {
        assert!(value > 0);
        self.recv_ring_size = value;
        self
    }

    /// Sets the send ring capacity in the target [TcpConfig].
    pub fn set_send_ring_size(mut self, value: usize) -> Self {
        assert!(value > 0);
        self.send_ring_size = value;
        self
    }

    /// Sets the background driver tick in the target [TcpConfig].
    pub fn set_driver_tick(mut self, value: Duration) -> Self {
        assert!(value > Duration::ZERO);
        self.driver_tick = value;
        self
    }

    /// Sets the maximum segment lifetime in the target [TcpConfig].
    pub fn set_msl(mut self, value: Duration) -> Self {
        self.msl = value;
        self
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Default Trait Implementation for TCP Configuration Descriptor
impl Default for TcpConfig {
    /// Creates a TCP Configuration Descriptor with the default values.
    fn default() -> Self {
        TcpConfig {
            advertised_mss: DEFAULT_MSS,
            handshake_retries: DEFAULT_HANDSHAKE_RETRIES,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            recv_ring_size: DEFAULT_RECV_RING_SIZE,
            send_ring_size: DEFAULT_SEND_RING_SIZE,
            driver_tick: DEFAULT_DRIVER_TICK,
            msl: DEFAULT_MSL,
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::TcpConfig;
    use crate::runtime::network::consts::{DEFAULT_MSS, DEFAULT_RECV_RING_SIZE};
    use ::anyhow::Result;
    use ::std::time::Duration;

    /// Tests default instantiation for [TcpConfig].
    #[test]
    fn tcp_config_default() -> Result<()> {
        let config: TcpConfig = TcpConfig::default();
        anyhow::ensure!(config.get_advertised_mss() == DEFAULT_MSS);
        anyhow::ensure!(config.get_recv_ring_size() == DEFAULT_RECV_RING_SIZE);
        anyhow::ensure!(config.get_handshake_retries() > 0);
        Ok(())
    }

    /// Tests the builder-style setters for [TcpConfig].
    #[test]
    fn tcp_config_setters() -> Result<()> {
        let config: TcpConfig = TcpConfig::default()
            .set_advertised_mss(1200)
            .set_handshake_timeout(Duration::from_secs(1))
            .set_send_ring_size(4096);
        anyhow::ensure!(config.get_advertised_mss() == 1200);
        anyhow::ensure!(config.get_handshake_timeout() == Duration::from_secs(1));
        anyhow::ensure!(config.get_send_ring_size() == 4096);
        Ok(())
    }
}
