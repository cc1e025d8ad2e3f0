//! Advertisement: periodic announcement of full files and the pull it
//! triggers in listeners.

use tracing::{debug, trace, warn};

use crate::config::NodeConfig;
use crate::node::Node;
use crate::traits::{Clock, Random, Scheduler, Transport};
use crate::types::{
    AdvertisedFile, Advertisement, NodeAddress, TimerSlot, MAX_ADVERTISED_FILES,
};
use crate::wire::Message;

impl<T, S, R, Clk, Cfg> Node<T, S, R, Clk, Cfg>
where
    T: Transport,
    S: Scheduler,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Advertisement of the files held in full, lowest ids first.
    ///
    /// Ids and sizes are truncated to 16 bits.
    pub fn build_advertisement(&self) -> Advertisement {
        let limit = Cfg::MAX_ADVERTISED_FILES.min(MAX_ADVERTISED_FILES);
        let files = self
            .catalog()
            .full_files()
            .into_iter()
            .take(limit)
            .map(|record| AdvertisedFile {
                file_id: record.id() as u16,
                size_kb: record.size_kb() as u16,
            })
            .collect();
        Advertisement { files }
    }

    pub(crate) fn on_advertise_timer(&mut self) {
        let adv = self.build_advertisement();
        debug!(
            node = %self.address(),
            files = adv.files.len(),
            "advertising"
        );
        self.send(Message::Advertisement(adv));
        self.rearm_advertise();
    }

    pub(crate) fn handle_advertisement(&mut self, adv: Advertisement, from: NodeAddress) {
        self.observe_full_count(adv.files.len());

        for entry in &adv.files {
            let file_id = u32::from(entry.file_id);
            if self
                .catalog_mut()
                .merge_discovered(file_id, u32::from(entry.size_kb), from)
            {
                trace!(
                    node = %self.address(),
                    file_id,
                    size_kb = entry.size_kb,
                    "file discovered"
                );
            }
        }

        let advertise_delay = self.advertise_delay(false);
        let neighbors = self.neighbors().len();
        match self.catalog().pick_file_to_request(from, neighbors) {
            Some(file_id) => {
                let request_delay = self.request_delay();
                if request_delay > advertise_delay {
                    warn!(
                        node = %self.address(),
                        request_us = request_delay.as_micros(),
                        advertise_us = advertise_delay.as_micros(),
                        "request delay exceeds advertise delay"
                    );
                }
                debug!(
                    node = %self.address(),
                    target = %from,
                    file_id,
                    delay_us = request_delay.as_micros(),
                    "scheduling request"
                );
                self.arm_request(from, file_id, request_delay);
            }
            None => {
                debug!(node = %self.address(), neighbor = %from, "nothing to request");
            }
        }
        self.arm(TimerSlot::Advertise, advertise_delay);
    }
}
