pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGSHIP CONFIGURATION
# =============================================================================
# Logship tails JSON-lines log files in a directory, groups new entries into
# batches and ships them to an HTTP ingestion endpoint. Batches that cannot be
# delivered are kept on disk and retried on every upload interval.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logship/config.yml
#   3. /etc/logship/config.yml
#
# Any value may reference an environment variable with $env{NAME}.

# =============================================================================
# COLLECTOR
# =============================================================================
collector:
  # Stamped on entries that do not carry a MachineId. Leave empty to use the
  # host name. At most 50 characters.
  machine_id: ""

  # Directory to watch (created if missing) and the file name glob to match.
  log_directory: /var/log/machine
  file_pattern: "*.log"

  # Batch bounds. The size is an estimate of the entry payload, not the
  # exact request size. A single entry larger than the limit ships alone.
  max_batch_size_bytes: 1048576
  max_batch_entries: 1000

  # How often buffered batches are replayed, and how many per cycle.
  upload_interval: 5s
  max_buffer_batches_per_cycle: 100

  # Undelivered batches and per-file read positions live under this directory.
  buffer_directory: /var/lib/logship

  # Files processed in parallel. Runs for the same file never overlap.
  max_concurrent_files: 4

  retry:
    # Attempts after the first failure; delays start at `interval` and double
    # each attempt when exponential_backoff is on.
    count: 3
    interval: 1s
    exponential_backoff: true

  # On shutdown, how long in-flight files may keep delivering before their
  # retries are cancelled.
  shutdown_grace: 10s

# =============================================================================
# SINK
# =============================================================================
sink:
  url: https://ingest.example.com/api/logs/batch
  # bearer_token: $env{LOGSHIP_TOKEN}
  # headers:
  #   X-Stream: machine-logs
  timeout: 30s

# =============================================================================
# HOUSEKEEPING
# =============================================================================
# Accepted for compatibility; rotation and retention are handled elsewhere.
housekeeping:
  rotation_interval_days: 1
  max_file_size_bytes: 52428800
  retention_days: 7
"#
    .to_string()
}
