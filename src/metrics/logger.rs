use super::TickSnapshot;
use crate::network::Tick;
use anyhow::{Context, Result, bail};
use csv::{Reader, Writer};
use std::fs::File;
use std::path::{Path, PathBuf};

pub const NETWORK_FILE: &str = "network.csv";
pub const AGENT_FILE: &str = "agents.csv";

/// Writes `network.csv` (one row per tick) and `agents.csv` (one row per
/// active agent per tick) into a run directory.
pub struct MetricsLogger {
    network: Writer<File>,
    agents: Writer<File>,
    num_networks: Option<usize>,
}

impl MetricsLogger {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let mut agents = Writer::from_path(dir.join(AGENT_FILE))?;
        agents.write_record([
            "tick", "agent", "area", "network", "delay_s", "gain", "download_mb", "explored",
            "transmissions", "listens", "stabilized_on", "probabilities", "weights", "counterfactual",
        ])?;
        Ok(Self {
            network: Writer::from_path(dir.join(NETWORK_FILE))?,
            agents,
            num_networks: None,
        })
    }

    pub fn log(&mut self, snapshot: &TickSnapshot) -> Result<()> {
        self.write(snapshot)?;
        self.network.flush()?;
        self.agents.flush()?;
        Ok(())
    }

    pub fn log_batch(&mut self, snapshots: &[TickSnapshot]) -> Result<()> {
        for snapshot in snapshots {
            self.write(snapshot)?;
        }
        self.network.flush()?;
        self.agents.flush()?;
        Ok(())
    }

    fn write(&mut self, snapshot: &TickSnapshot) -> Result<()> {
        match self.num_networks {
            None => {
                let mut header = vec!["tick".to_string()];
                header.extend(snapshot.networks.iter().map(|n| format!("occupants_{}", n.id)));
                header.extend(snapshot.networks.iter().map(|n| format!("agents_{}", n.id)));
                self.network.write_record(&header)?;
                self.num_networks = Some(snapshot.networks.len());
            }
            Some(n) if n != snapshot.networks.len() => {
                bail!("tick {} has {} networks, expected {}", snapshot.tick, snapshot.networks.len(), n)
            }
            Some(_) => {}
        }

        let mut row = vec![snapshot.tick.to_string()];
        row.extend(snapshot.networks.iter().map(|n| n.occupants.len().to_string()));
        row.extend(snapshot.networks.iter().map(|n| join(&n.occupants)));
        self.network.write_record(&row)?;

        for a in &snapshot.agents {
            self.agents.write_record(&[
                snapshot.tick.to_string(),
                a.agent.to_string(),
                a.area.to_string(),
                a.network.map(|n| n.to_string()).unwrap_or_default(),
                format!("{:.3}", a.delay_s),
                format!("{:.4}", a.gain),
                format!("{:.4}", a.download_mb),
                a.explored.to_string(),
                a.transmissions.to_string(),
                a.listens.to_string(),
                a.stabilized.map(|s| s.network.to_string()).unwrap_or_default(),
                join(&a.probabilities),
                join(&a.weights),
                join(&a.counterfactual),
            ])?;
        }
        Ok(())
    }
}

fn join<T: ToString>(values: &[T]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(";")
}

pub fn network_file(dir: impl AsRef<Path>) -> PathBuf {
    dir.as_ref().join(NETWORK_FILE)
}

/// Reads the per-tick occupant counts back from a `network.csv`.
pub fn load_occupancy(path: impl AsRef<Path>) -> Result<Vec<(Tick, Vec<usize>)>> {
    let path = path.as_ref();
    let mut reader = Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    let counts: Vec<usize> = reader
        .headers()?
        .iter()
        .enumerate()
        .filter(|(_, h)| h.starts_with("occupants_"))
        .map(|(i, _)| i)
        .collect();

    let mut series = Vec::new();
    for row in reader.records() {
        let row = row?;
        let tick: Tick = row.get(0).context("missing tick column")?.parse()?;
        let occupancy = counts
            .iter()
            .map(|&i| Ok(row.get(i).context("short row")?.parse::<usize>()?))
            .collect::<Result<Vec<usize>>>()?;
        series.push((tick, occupancy));
    }
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::NetworkState;

    fn snapshot(tick: Tick, occupants: [Vec<u32>; 2]) -> TickSnapshot {
        let [a, b] = occupants;
        TickSnapshot {
            tick,
            networks: vec![
                NetworkState { id: 1, capacity: 4.0, occupants: a },
                NetworkState { id: 2, capacity: 7.0, occupants: b },
            ],
            agents: vec![],
        }
    }

    #[test]
    fn occupancy_survives_a_trip_through_csv() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log_batch(&[snapshot(1, [vec![1], vec![2, 3]]), snapshot(2, [vec![], vec![1, 2, 3]])]).unwrap();
        drop(logger);

        let series = load_occupancy(network_file(dir.path())).unwrap();
        assert_eq!(series, vec![(1, vec![1, 2]), (2, vec![0, 3])]);
        let agents = std::fs::read_to_string(dir.path().join(AGENT_FILE)).unwrap();
        assert!(agents.starts_with("tick,agent,area"));
    }

    #[test]
    fn network_count_cannot_change_mid_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut logger = MetricsLogger::new(dir.path()).unwrap();
        logger.log(&snapshot(1, [vec![], vec![]])).unwrap();
        let mut short = snapshot(2, [vec![], vec![]]);
        short.networks.pop();
        assert!(logger.log(&short).is_err());
    }
}
