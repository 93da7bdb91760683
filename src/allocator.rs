//! Endpoint allocation on base-station links
//!
//! Every base station numbers its media gateway endpoints on its own. The
//! link keeps one usage flag per endpoint and hands out free ones round robin
//! so that a just released endpoint is not reused right away.

use tracing::{debug, error};

use crate::cic::{endpoint_to_slot, multiplexes_for, slot_to_endpoint};
use crate::config::LinkConfig;
use crate::error::{NatError, NatResult};
use crate::limits::{RESERVED_TIMESLOT, TIMESLOTS_PER_MULTIPLEX};
use crate::types::LinkId;

/// Allocation state that exists once the link has been configured
#[derive(Debug, Clone)]
struct EndpointPool {
    status: Vec<bool>,
    multiplexes: u32,
    max_endpoints: u32,
}

/// One connected base station
#[derive(Debug, Clone)]
pub struct BaseStationLink {
    id: LinkId,
    config: Option<LinkConfig>,
    pool: Option<EndpointPool>,
    last_endpoint: u32,
}

impl BaseStationLink {
    /// A freshly attached link, possibly before its configuration is known
    pub fn new(id: LinkId, config: Option<LinkConfig>) -> Self {
        Self {
            id,
            config,
            pool: None,
            last_endpoint: 0,
        }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn config(&self) -> Option<&LinkConfig> {
        self.config.as_ref()
    }

    /// Attach the configuration once the base station identified itself.
    ///
    /// The allocation state is derived from it on first use and is not
    /// rebuilt afterwards.
    pub fn set_config(&mut self, config: LinkConfig) {
        self.config = Some(config);
    }

    /// Set up the usage flags if that has not happened yet
    pub fn ensure_initialized(&mut self) -> NatResult<()> {
        if self.pool.is_some() {
            return Ok(());
        }

        let config = self.config.ok_or(NatError::Unconfigured { link: self.id.0 })?;
        let multiplexes = multiplexes_for(config.max_endpoints);
        let size = (TIMESLOTS_PER_MULTIPLEX * multiplexes + 1) as usize;

        debug!(link = %self.id, multiplexes, max_endpoints = config.max_endpoints, "endpoint pool created");
        self.pool = Some(EndpointPool {
            status: vec![false; size],
            multiplexes,
            max_endpoints: config.max_endpoints,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.is_some()
    }

    pub fn last_endpoint(&self) -> u32 {
        self.last_endpoint
    }

    pub fn max_endpoints(&self) -> Option<u32> {
        self.pool.as_ref().map(|pool| pool.max_endpoints)
    }

    pub fn multiplexes(&self) -> Option<u32> {
        self.pool.as_ref().map(|pool| pool.multiplexes)
    }

    /// Whether an endpoint is currently handed out
    pub fn is_claimed(&self, endpoint: u32) -> bool {
        self.pool
            .as_ref()
            .and_then(|pool| pool.status.get(endpoint as usize).copied())
            .unwrap_or(false)
    }

    /// Number of endpoints currently handed out
    pub fn claimed_count(&self) -> usize {
        self.pool
            .as_ref()
            .map(|pool| pool.status.iter().filter(|used| **used).count())
            .unwrap_or(0)
    }

    /// Claim the next free endpoint after the allocation cursor
    pub fn claim(&mut self) -> NatResult<u32> {
        self.ensure_initialized()?;
        let link = self.id;
        let (mut multiplex, mut timeslot) = endpoint_to_slot(self.last_endpoint);
        let pool = match self.pool.as_mut() {
            Some(pool) => pool,
            None => return Err(NatError::Unconfigured { link: link.0 }),
        };
        timeslot += 1;

        for _ in 0..pool.max_endpoints {
            // Wrap around timeslots
            if timeslot == 0 {
                timeslot = 1;
            }
            if timeslot == RESERVED_TIMESLOT {
                timeslot = 1;
                multiplex += 1;
            }

            // Wrap around the multiplex
            if multiplex >= pool.multiplexes {
                multiplex = 0;
            }

            let mut endpoint = slot_to_endpoint(multiplex, timeslot);
            if endpoint >= pool.max_endpoints {
                multiplex = 0;
                timeslot = 1;
                endpoint = slot_to_endpoint(multiplex, timeslot);
            }

            if let Some(used) = pool.status.get_mut(endpoint as usize) {
                if !*used {
                    *used = true;
                    self.last_endpoint = endpoint;
                    debug!(link = %link, endpoint = format_args!("{:#x}", endpoint), "endpoint claimed");
                    return Ok(endpoint);
                }
            }

            timeslot += 1;
        }

        Err(NatError::AllocationExhausted {
            link: link.0,
            max_endpoints: pool.max_endpoints,
        })
    }

    /// Hand an endpoint back. Releasing a free endpoint is only logged.
    pub fn release(&mut self, endpoint: u32) {
        let Some(pool) = self.pool.as_mut() else {
            error!(link = %self.id, endpoint = format_args!("{:#x}", endpoint), "release on link without endpoint pool");
            return;
        };

        match pool.status.get_mut(endpoint as usize) {
            Some(used) => {
                if !*used {
                    error!(link = %self.id, endpoint = format_args!("{:#x}", endpoint), "endpoint was not in use");
                }
                *used = false;
            }
            None => {
                error!(link = %self.id, endpoint = format_args!("{:#x}", endpoint), "release of endpoint outside of the pool");
            }
        }
    }
}
