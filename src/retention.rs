/// Keep-counts per retention class; `None` or zero leaves a class unconstrained
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_last: Option<u32>,
    pub keep_hourly: Option<u32>,
    pub keep_daily: Option<u32>,
    pub keep_weekly: Option<u32>,
    pub keep_monthly: Option<u32>,
    pub keep_yearly: Option<u32>,
}

/// Config keys for each retention class, in the order flags are emitted
pub const RETENTION_KEYS: [&str; 6] = [
    "KEEP_LAST",
    "KEEP_HOURLY",
    "KEEP_DAILY",
    "KEEP_WEEKLY",
    "KEEP_MONTHLY",
    "KEEP_YEARLY",
];

impl RetentionPolicy {
    fn classes(&self) -> [(&'static str, Option<u32>); 6] {
        [
            ("last", self.keep_last),
            ("hourly", self.keep_hourly),
            ("daily", self.keep_daily),
            ("weekly", self.keep_weekly),
            ("monthly", self.keep_monthly),
            ("yearly", self.keep_yearly),
        ]
    }

    /// Set a class by its config key (`KEEP_DAILY`, ...). Returns false for unknown keys.
    pub fn set(&mut self, key: &str, value: u32) -> bool {
        let slot = match key.to_ascii_uppercase().as_str() {
            "KEEP_LAST" => &mut self.keep_last,
            "KEEP_HOURLY" => &mut self.keep_hourly,
            "KEEP_DAILY" => &mut self.keep_daily,
            "KEEP_WEEKLY" => &mut self.keep_weekly,
            "KEEP_MONTHLY" => &mut self.keep_monthly,
            "KEEP_YEARLY" => &mut self.keep_yearly,
            _ => return false,
        };
        *slot = Some(value);
        true
    }

    /// True when no class carries a positive count, so pruning has nothing to do
    pub fn is_empty(&self) -> bool {
        self.classes()
            .iter()
            .all(|(_, count)| count.unwrap_or(0) == 0)
    }

    /// `restic forget` flags for every positive class
    pub fn forget_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        for (class, count) in self.classes() {
            if let Some(count) = count.filter(|c| *c > 0) {
                args.push(format!("--keep-{class}"));
                args.push(count.to_string());
            }
        }
        args
    }

    /// Short human-readable form, e.g. `daily=7, weekly=4`
    pub fn describe(&self) -> String {
        let parts: Vec<String> = self
            .classes()
            .iter()
            .filter_map(|(class, count)| {
                count
                    .filter(|c| *c > 0)
                    .map(|count| format!("{class}={count}"))
            })
            .collect();

        if parts.is_empty() {
            "none".to_string()
        } else {
            parts.join(", ")
        }
    }
}
