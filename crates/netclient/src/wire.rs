//! Response shapes of the chain REST API and the forge site, and their
//! conversion into core types. Nothing here leaks past the crate.

use inferwatch_core::{
    Competition, CompetitionListing, ConfidenceLadder, LeaderboardEntry, LeaderboardPage, RawSnapshot,
    WorkerValue, WorkerWeight,
};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct LatestInferences {
    pub network_inferences: NetworkInferences,
    #[serde(default)]
    pub inferer_weights: Option<Vec<WireWorkerWeight>>,
    pub inference_block_height: String,
    #[serde(default)]
    pub loss_block_height: Option<String>,
    #[serde(default)]
    pub confidence_interval_raw_percentiles: Option<Vec<String>>,
    #[serde(default)]
    pub confidence_interval_values: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct NetworkInferences {
    #[serde(default)]
    pub topic_id: String,
    #[serde(default)]
    pub reputer_request_nonce: Option<ReputerRequestNonce>,
    #[serde(default)]
    pub reputer: String,
    #[serde(default)]
    pub combined_value: String,
    #[serde(default)]
    pub naive_value: String,
    #[serde(default)]
    pub inferer_values: Option<Vec<WireWorkerValue>>,
    #[serde(default)]
    pub one_out_inferer_values: Option<Vec<WireWorkerValue>>,
    #[serde(default)]
    pub forecaster_values: Option<Vec<WireWorkerValue>>,
    #[serde(default)]
    pub one_out_forecaster_values: Option<Vec<WireWorkerValue>>,
    #[serde(default)]
    pub one_in_forecaster_values: Option<Vec<WireWorkerValue>>,
}

/// Worker entries tolerate null fields; a null id decodes to `""` and is
/// dropped by the merge.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct WireWorkerValue {
    pub worker: Option<String>,
    pub value: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(crate) struct WireWorkerWeight {
    pub worker: Option<String>,
    pub weight: Option<String>,
}

fn values(list: Option<Vec<WireWorkerValue>>) -> Vec<WorkerValue> {
    list.unwrap_or_default()
        .into_iter()
        .map(|w| WorkerValue { worker: w.worker.unwrap_or_default(), value: w.value.unwrap_or_default() })
        .collect()
}

fn weights(list: Option<Vec<WireWorkerWeight>>) -> Vec<WorkerWeight> {
    list.unwrap_or_default()
        .into_iter()
        .map(|w| WorkerWeight { worker: w.worker.unwrap_or_default(), weight: w.weight.unwrap_or_default() })
        .collect()
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReputerRequestNonce {
    #[serde(default)]
    pub reputer_nonce: Option<BlockNonce>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockNonce {
    #[serde(default)]
    pub block_height: String,
}

impl LatestInferences {
    /// `requested` fills the topic id when the network does not echo it.
    pub fn into_snapshot(self, requested: &str) -> RawSnapshot {
        let ni = self.network_inferences;
        let topic_id = if ni.topic_id.is_empty() { requested.to_string() } else { ni.topic_id };
        let reputer_nonce_height = ni
            .reputer_request_nonce
            .and_then(|r| r.reputer_nonce)
            .map(|n| n.block_height)
            .filter(|h| !h.is_empty());
        RawSnapshot {
            topic_id,
            inference_block_height: self.inference_block_height,
            loss_block_height: self.loss_block_height.unwrap_or_default(),
            reputer: ni.reputer,
            reputer_nonce_height,
            combined_value: ni.combined_value,
            naive_value: ni.naive_value,
            inferer_values: values(ni.inferer_values),
            one_out_inferer_values: values(ni.one_out_inferer_values),
            inferer_weights: weights(self.inferer_weights),
            forecaster_values: values(ni.forecaster_values),
            one_out_forecaster_values: values(ni.one_out_forecaster_values),
            one_in_forecaster_values: values(ni.one_in_forecaster_values),
            ladder: ConfidenceLadder {
                values: self.confidence_interval_values.unwrap_or_default(),
                percentiles: self.confidence_interval_raw_percentiles.unwrap_or_default(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockResponse {
    pub block: Block,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Block {
    pub header: BlockHeader,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BlockHeader {
    #[serde(default)]
    pub time: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LeaderboardResponse {
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub data: Option<LeaderboardData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LeaderboardData {
    #[serde(default)]
    pub leaderboard: Option<Vec<WireLeaderboardEntry>>,
    #[serde(default)]
    pub continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireLeaderboardEntry {
    #[serde(default)]
    pub rank: String,
    #[serde(default)]
    pub cosmos_address: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub points: f64,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub loss: f64,
    #[serde(default)]
    pub is_active: bool,
}

impl From<WireLeaderboardEntry> for LeaderboardEntry {
    fn from(w: WireLeaderboardEntry) -> Self {
        LeaderboardEntry {
            rank: w.rank,
            cosmos_address: w.cosmos_address,
            username: w.username.unwrap_or_default(),
            first_name: w.first_name.unwrap_or_default(),
            last_name: w.last_name.unwrap_or_default(),
            points: w.points,
            score: w.score,
            loss: w.loss,
            is_active: w.is_active,
        }
    }
}

impl LeaderboardResponse {
    pub fn into_page(self) -> LeaderboardPage {
        let (entries, token) = match self.data {
            Some(d) => (d.leaderboard.unwrap_or_default(), d.continuation_token),
            None => (Vec::new(), None),
        };
        LeaderboardPage {
            entries: entries.into_iter().map(LeaderboardEntry::from).collect(),
            next_token: token.filter(|t| !t.is_empty()),
            ok: self.status,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompetitionsData {
    pub page_props: PageProps,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PageProps {
    pub competitions_page: CompetitionsPage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CompetitionsPage {
    #[serde(default)]
    pub active_and_upcoming_competitions: Option<Vec<WireCompetition>>,
    #[serde(default)]
    pub past_competitions: Option<Vec<WireCompetition>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireCompetition {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preview_image_url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub topic_id: i64,
    #[serde(default)]
    pub prize_pool: i64,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub season_id: Option<i64>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

impl From<WireCompetition> for Competition {
    fn from(w: WireCompetition) -> Self {
        Competition {
            id: w.id,
            name: w.name.unwrap_or_default(),
            preview_image_url: w.preview_image_url.unwrap_or_default(),
            description: w.description,
            topic_id: w.topic_id,
            prize_pool: w.prize_pool,
            start_date: w.start_date.unwrap_or_default(),
            end_date: w.end_date.unwrap_or_default(),
            season_id: w.season_id.unwrap_or_default(),
            tags: w.tags.unwrap_or_default(),
        }
    }
}

impl CompetitionsData {
    pub fn into_listing(self) -> CompetitionListing {
        let page = self.page_props.competitions_page;
        let convert = |v: Option<Vec<WireCompetition>>| -> Vec<Competition> {
            v.unwrap_or_default().into_iter().map(Competition::from).collect()
        };
        CompetitionListing {
            active_and_upcoming: convert(page.active_and_upcoming_competitions),
            past: convert(page.past_competitions),
        }
    }
}
