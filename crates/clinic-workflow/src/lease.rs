//! 租约管理
//!
//! 分诊队列的抢占协调：租约即 (claimed_by, claimed_at) 两列，
//! 过期纯粹按墙钟时间判定，没有后台回收任务。
//! 本模块只做判定，不做写入；写入由存储层以条件更新完成。

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use clinic_core::{Lease, LeaseState};

/// 默认租约时长（分钟）
pub const DEFAULT_LEASE_TTL_MINUTES: i64 = 15;

/// 抢占判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseDecision {
    /// 允许获取（空缺、已过期、或本人续租）
    Granted,
    /// 他人持有有效租约
    Denied { owner_id: Uuid },
}

/// 释放判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseDecision {
    /// 允许释放（本人持有、空缺或已过期时均视为成功）
    Released,
    /// 他人持有有效租约，禁止释放
    Forbidden { owner_id: Uuid },
}

/// 租约管理器
#[derive(Debug, Clone)]
pub struct LeaseManager {
    ttl: Duration,
}

impl LeaseManager {
    /// 创建指定时长的租约管理器
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    /// 租约时长
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// 唯一的挂钟过期判定，恰好达到 TTL 即视为过期
    pub fn is_expired(&self, acquired_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - acquired_at >= self.ttl
    }

    /// 判定当前租约状态
    pub fn classify(&self, lease: &Lease, now: DateTime<Utc>) -> LeaseState {
        lease.state(now, self.ttl)
    }

    /// 抢占判定：空缺或过期的租约可以获取，本人重复获取视为续租
    pub fn try_acquire(&self, lease: &Lease, worker_id: Uuid, now: DateTime<Utc>) -> LeaseDecision {
        match lease.state(now, self.ttl) {
            LeaseState::Free => LeaseDecision::Granted,
            LeaseState::Expired { .. } => LeaseDecision::Granted,
            LeaseState::Live { owner_id } if owner_id == worker_id => LeaseDecision::Granted,
            LeaseState::Live { owner_id } => LeaseDecision::Denied { owner_id },
        }
    }

    /// 释放判定：宽容语义，只有他人持有的有效租约会被拒绝
    pub fn release(&self, lease: &Lease, worker_id: Uuid, now: DateTime<Utc>) -> ReleaseDecision {
        match lease.state(now, self.ttl) {
            LeaseState::Free => ReleaseDecision::Released,
            LeaseState::Expired { .. } => ReleaseDecision::Released,
            LeaseState::Live { owner_id } if owner_id == worker_id => ReleaseDecision::Released,
            LeaseState::Live { owner_id } => ReleaseDecision::Forbidden { owner_id },
        }
    }
}

impl Default for LeaseManager {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_LEASE_TTL_MINUTES))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(owner: Uuid, at: DateTime<Utc>) -> Lease {
        Lease::Held {
            owner_id: owner,
            acquired_at: at,
        }
    }

    #[test]
    fn test_acquire_free_lease() {
        let mgr = LeaseManager::default();
        let worker = Uuid::new_v4();
        let now = Utc::now();

        assert_eq!(mgr.try_acquire(&Lease::Free, worker, now), LeaseDecision::Granted);
    }

    #[test]
    fn test_mutual_exclusion() {
        let mgr = LeaseManager::default();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let now = Utc::now();

        // Alice 持有有效租约时 Bob 被拒绝
        let lease = held(alice, now - Duration::minutes(5));
        assert_eq!(
            mgr.try_acquire(&lease, bob, now),
            LeaseDecision::Denied { owner_id: alice }
        );
    }

    #[test]
    fn test_idempotent_renew() {
        let mgr = LeaseManager::default();
        let alice = Uuid::new_v4();
        let now = Utc::now();

        // 本人重复获取视为续租
        let lease = held(alice, now - Duration::minutes(5));
        assert_eq!(mgr.try_acquire(&lease, alice, now), LeaseDecision::Granted);
    }

    #[test]
    fn test_expired_lease_can_be_taken() {
        let mgr = LeaseManager::default();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let now = Utc::now();

        // 超过 TTL 后任何人都可以接管
        let lease = held(alice, now - Duration::minutes(16));
        assert_eq!(mgr.try_acquire(&lease, bob, now), LeaseDecision::Granted);
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let mgr = LeaseManager::default();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let now = Utc::now();

        // 恰好等于 TTL 视为已过期
        let lease = held(alice, now - Duration::minutes(15));
        assert_eq!(mgr.try_acquire(&lease, bob, now), LeaseDecision::Granted);

        // 差一秒则仍然有效
        let lease = held(alice, now - Duration::minutes(15) + Duration::seconds(1));
        assert_eq!(
            mgr.try_acquire(&lease, bob, now),
            LeaseDecision::Denied { owner_id: alice }
        );
    }

    #[test]
    fn test_release_rules() {
        let mgr = LeaseManager::default();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let now = Utc::now();

        // 本人释放成功
        let lease = held(alice, now - Duration::minutes(5));
        assert_eq!(mgr.release(&lease, alice, now), ReleaseDecision::Released);

        // 他人持有有效租约时拒绝
        assert_eq!(
            mgr.release(&lease, bob, now),
            ReleaseDecision::Forbidden { owner_id: alice }
        );

        // 空缺与过期的租约释放均视为成功
        assert_eq!(mgr.release(&Lease::Free, bob, now), ReleaseDecision::Released);
        let expired = held(alice, now - Duration::minutes(20));
        assert_eq!(mgr.release(&expired, bob, now), ReleaseDecision::Released);
    }
}
