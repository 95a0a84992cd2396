use crate::chunker::{chunks, ChunkMode};
use crate::config::{connect_address, DistributorConfig, Limits};
use crate::encoding::{final_parse, CountEncoding, WordTable};
use crate::error::{MrError, Result};
use crate::report::Report;
use crate::transport::request_or_empty;
use crate::{Command, Request};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub map_chunks: usize,
    pub reduce_chunks: usize,
    /// Requests whose exchange failed; each counted as an empty reply.
    pub failed_requests: usize,
    /// Requests larger than the message ceiling; the worker reads only a
    /// prefix of each.
    pub oversized_requests: usize,
    pub intermediate_len: usize,
}

/// Drives the map and reduce phases against a fixed list of workers, one
/// synchronous request at a time. The i-th chunk of a phase always goes to
/// worker `i mod W`; there is no retry and no failure detection, so a worker
/// that never answers stalls the run unless a request timeout is set.
pub struct Distributor {
    workers: Vec<String>,
    limits: Limits,
    request_timeout: Option<Duration>,
    final_encoding: CountEncoding,
}

impl Distributor {
    pub fn new(config: &DistributorConfig) -> Result<Distributor> {
        config.validate()?;
        let workers = config
            .workers
            .iter()
            .map(|addr| connect_address(addr))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Distributor {
            workers,
            limits: config.limits,
            request_timeout: config.request_timeout(),
            final_encoding: config.final_encoding,
        })
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    /// Runs both phases, builds the report, then shuts every worker down.
    pub async fn run(&self, text: &[u8]) -> (Report, PipelineStats) {
        let mut stats = PipelineStats::default();

        let intermediate = self.map_phase(text, &mut stats).await;
        let table = self.reduce_phase(&intermediate, &mut stats).await;
        let report = Report::from_table(table);

        info!(
            words = report.entries().len(),
            total = report.total(),
            map_chunks = stats.map_chunks,
            reduce_chunks = stats.reduce_chunks,
            failed = stats.failed_requests,
            oversized = stats.oversized_requests,
            "pipeline finished"
        );

        self.shutdown_workers().await;
        (report, stats)
    }

    /// Sends raw-text chunks as map requests and concatenates the replies in
    /// chunk order.
    pub async fn map_phase(&self, text: &[u8], stats: &mut PipelineStats) -> Vec<u8> {
        info!(bytes = text.len(), workers = self.workers.len(), "map phase");
        let mut intermediate = Vec::new();
        for (index, chunk) in chunks(text, self.limits.max_payload(), ChunkMode::RawText).enumerate()
        {
            let reply = self.dispatch(index, Command::Map, chunk, stats).await;
            intermediate.extend_from_slice(&reply);
            stats.map_chunks += 1;
        }
        stats.intermediate_len = intermediate.len();
        intermediate
    }

    /// Sends intermediate chunks as reduce requests and merges every reply
    /// into one table.
    pub async fn reduce_phase(&self, intermediate: &[u8], stats: &mut PipelineStats) -> WordTable {
        info!(bytes = intermediate.len(), "reduce phase");
        let mut table = WordTable::new();
        for (index, chunk) in
            chunks(intermediate, self.limits.max_payload(), ChunkMode::Intermediate).enumerate()
        {
            let reply = self.dispatch(index, Command::Reduce, chunk, stats).await;
            table.merge_table(&final_parse(&reply, self.final_encoding, &self.limits));
            stats.reduce_chunks += 1;
        }
        table
    }

    /// One shutdown request per worker, in configured order. Replies are
    /// only logged.
    pub async fn shutdown_workers(&self) {
        let message = Request::new(Command::Shutdown, &[]).encode();
        for addr in &self.workers {
            match request_or_empty(addr, &message, self.limits.max_message_len, self.request_timeout)
                .await
            {
                Some(ack) => debug!(addr = %addr, ack = %String::from_utf8_lossy(&ack), "worker shut down"),
                None => warn!(addr = %addr, "no shutdown acknowledgement"),
            }
        }
    }

    async fn dispatch(
        &self,
        index: usize,
        command: Command,
        payload: &[u8],
        stats: &mut PipelineStats,
    ) -> Vec<u8> {
        let addr = &self.workers[index % self.workers.len()];
        let message = Request::new(command, payload).encode();
        debug!(index, addr = %addr, ?command, payload = payload.len(), "dispatch");
        if message.len() > self.limits.max_message_len {
            warn!(
                index,
                addr = %addr,
                len = message.len(),
                max = self.limits.max_message_len,
                "request exceeds message ceiling; worker will truncate it"
            );
            stats.oversized_requests += 1;
        }
        match request_or_empty(addr, &message, self.limits.max_message_len, self.request_timeout)
            .await
        {
            Some(reply) => reply,
            None => {
                stats.failed_requests += 1;
                Vec::new()
            }
        }
    }
}

pub fn load_input(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|source| MrError::LoadInput {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads the configured input and runs the whole pipeline once.
pub async fn run_distributor(config: &DistributorConfig) -> Result<(Report, PipelineStats)> {
    let distributor = Distributor::new(config)?;
    let text = load_input(&config.input)?;
    Ok(distributor.run(&text).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerConfig;
    use crate::worker_node::{spawn_workers, RunningWorker};
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    async fn start_workers(n: usize) -> Vec<RunningWorker> {
        let config = WorkerConfig {
            addresses: vec!["127.0.0.1:0".to_string(); n],
            recv_timeout_ms: 20,
            ..WorkerConfig::default()
        };
        spawn_workers(&config).await.unwrap()
    }

    fn config_for(workers: &[RunningWorker], limits: Limits) -> DistributorConfig {
        DistributorConfig {
            workers: workers.iter().map(|w| w.addr.to_string()).collect(),
            limits,
            ..DistributorConfig::default()
        }
    }

    fn pairs(report: &Report) -> Vec<(&str, u64)> {
        report
            .entries()
            .iter()
            .map(|e| (e.word.as_str(), e.count))
            .collect()
    }

    #[tokio::test]
    async fn counts_small_text_with_two_workers() {
        let workers = start_workers(2).await;
        let distributor = Distributor::new(&config_for(&workers, Limits::default())).unwrap();

        let (report, stats) = distributor.run(b"the cat sat on the mat").await;
        assert_eq!(
            pairs(&report),
            vec![("the", 2), ("cat", 1), ("mat", 1), ("on", 1), ("sat", 1)]
        );
        assert_eq!(stats.map_chunks, 1);
        assert_eq!(stats.reduce_chunks, 1);
        assert_eq!(stats.failed_requests, 0);

        // one map and one reduce request both land on worker 0
        let mut served = Vec::new();
        for worker in workers {
            served.push(worker.handle.await.unwrap());
        }
        assert_eq!(served, vec![3, 1]);
    }

    #[tokio::test]
    async fn small_payloads_spread_over_workers_without_losing_words() {
        let workers = start_workers(3).await;
        let limits = Limits {
            max_message_len: 64,
            ..Limits::default()
        };
        let distributor = Distributor::new(&config_for(&workers, limits)).unwrap();

        let text = "Alpha beta, gamma; alpha BETA alpha.\n".repeat(30);
        let (report, stats) = distributor.run(text.as_bytes()).await;
        assert_eq!(pairs(&report), vec![("alpha", 90), ("beta", 60), ("gamma", 30)]);
        assert!(stats.map_chunks > 3);
        assert!(stats.reduce_chunks > 1);
        assert_eq!(report.total(), 180);

        for worker in workers {
            worker.handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn unreachable_worker_counts_as_empty_reply() {
        let mut workers = start_workers(2).await;
        let dead = workers.pop().unwrap();
        dead.stop.stop();
        dead.handle.await.unwrap();

        let limits = Limits {
            max_message_len: 30,
            ..Limits::default()
        };
        let mut config = config_for(&workers, limits);
        config.workers.push(dead.addr.to_string());
        let distributor = Distributor::new(&config).unwrap();

        // two map chunks: "alpha beta " to the live worker, the rest to the dead one
        let mut stats = PipelineStats::default();
        let intermediate = distributor
            .map_phase(b"alpha beta gamma delta", &mut stats)
            .await;
        assert_eq!(stats.map_chunks, 2);
        assert_eq!(stats.failed_requests, 1);
        assert_eq!(intermediate, b"alpha1beta1".to_vec());

        let table = distributor.reduce_phase(&intermediate, &mut stats).await;
        assert_eq!(stats.reduce_chunks, 2);
        assert_eq!(stats.failed_requests, 2);
        assert_eq!(table.get("alpha"), Some(1));
        assert_eq!(table.get("beta"), None);

        distributor.shutdown_workers().await;
        workers.pop().unwrap().handle.await.unwrap();
    }

    #[tokio::test]
    async fn repeated_runs_are_identical() {
        let text = b"a b c a b a d e f g h i j k l m n o p q r s t u v w x y z ".repeat(20);
        let mut rendered = Vec::new();
        for _ in 0..2 {
            let workers = start_workers(2).await;
            let limits = Limits {
                max_message_len: 100,
                ..Limits::default()
            };
            let distributor = Distributor::new(&config_for(&workers, limits)).unwrap();
            let (report, _) = distributor.run(&text).await;
            let mut out = Vec::new();
            report.write_csv(&mut out).unwrap();
            rendered.push(out);
        }
        assert_eq!(rendered[0], rendered[1]);
        assert!(rendered[0].starts_with(b"word,frequency\na,60\nb,40\n"));
    }

    #[tokio::test]
    async fn oversized_request_is_counted_and_still_sent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let sink = tokio::spawn(async move {
            let mut lengths = Vec::new();
            for _ in 0..2 {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut message = Vec::new();
                stream.read_to_end(&mut message).await.unwrap();
                lengths.push(message.len());
            }
            lengths
        });

        let config = DistributorConfig {
            workers: vec![addr],
            limits: Limits {
                max_message_len: 30,
                ..Limits::default()
            },
            ..DistributorConfig::default()
        };
        let distributor = Distributor::new(&config).unwrap();

        // no separator near the target offset, so the forward scan overshoots
        let text = format!("a {} b", "x".repeat(40));
        let mut stats = PipelineStats::default();
        let intermediate = distributor.map_phase(text.as_bytes(), &mut stats).await;

        assert_eq!(sink.await.unwrap(), vec![46, 4]);
        assert_eq!(stats.map_chunks, 2);
        assert_eq!(stats.oversized_requests, 1);
        assert_eq!(stats.failed_requests, 0);
        assert!(intermediate.is_empty());
    }

    #[tokio::test]
    async fn request_timeout_turns_silent_worker_into_empty_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        // accepts and holds every connection without ever replying
        let silent = tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                held.push(stream);
            }
        });

        let config = DistributorConfig {
            workers: vec![addr],
            request_timeout_ms: Some(50),
            ..DistributorConfig::default()
        };
        let distributor = Distributor::new(&config).unwrap();

        let mut stats = PipelineStats::default();
        let intermediate = timeout(
            Duration::from_secs(2),
            distributor.map_phase(b"one two", &mut stats),
        )
        .await
        .expect("request timeout did not fire");
        assert!(intermediate.is_empty());
        assert_eq!(stats.map_chunks, 1);
        assert_eq!(stats.failed_requests, 1);

        silent.abort();
    }

    #[test]
    fn worker_addresses_are_normalised_for_connecting() {
        let config = DistributorConfig {
            workers: vec!["5555".to_string(), "node-2:7000".to_string()],
            ..DistributorConfig::default()
        };
        let distributor = Distributor::new(&config).unwrap();
        assert_eq!(distributor.workers(), ["127.0.0.1:5555", "node-2:7000"]);
    }

    #[test]
    fn missing_input_is_a_load_error() {
        let err = load_input(Path::new("/nonexistent/input.txt")).unwrap_err();
        assert!(matches!(err, MrError::LoadInput { .. }));
    }

    #[test]
    fn empty_worker_list_is_rejected() {
        assert!(matches!(
            Distributor::new(&DistributorConfig::default()),
            Err(MrError::Config(_))
        ));
    }
}
