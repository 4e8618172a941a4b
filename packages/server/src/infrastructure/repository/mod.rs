//! Repository implementations
//!
//! 外部コラボレーター（会議ディレクトリ、参加者の永続化、本人確認）の実装です。
//! 現在はインメモリ実装のみを提供します。

pub mod inmemory;
