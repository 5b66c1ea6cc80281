use crate::model::PlaybackStatus;

/// Index of the player to show: first playing, else first paused, else first.
/// `statuses` must be in discovery order.
#[must_use]
pub fn select_best(statuses: &[PlaybackStatus]) -> Option<usize> {
    statuses
        .iter()
        .position(|s| *s == PlaybackStatus::Playing)
        .or_else(|| statuses.iter().position(|s| *s == PlaybackStatus::Paused))
        .or_else(|| (!statuses.is_empty()).then_some(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use PlaybackStatus::{Paused, Playing, Stopped};

    const ALL: [PlaybackStatus; 3] = [Playing, Paused, Stopped];

    fn permutations(items: &[usize]) -> Vec<Vec<usize>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for (i, head) in items.iter().enumerate() {
            let mut rest = items.to_vec();
            rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, *head);
                out.push(tail);
            }
        }
        out
    }

    fn expected(order: &[PlaybackStatus]) -> Option<usize> {
        for (i, s) in order.iter().enumerate() {
            if *s == Playing {
                return Some(i);
            }
        }
        for (i, s) in order.iter().enumerate() {
            if *s == Paused {
                return Some(i);
            }
        }
        if order.is_empty() {
            None
        } else {
            Some(0)
        }
    }

    #[test]
    fn empty_set_selects_nothing() {
        assert_eq!(select_best(&[]), None);
    }

    #[test]
    fn every_ordering_and_status_assignment() {
        let mut checked = 0;
        for a in ALL {
            for b in ALL {
                for c in ALL {
                    let assigned = [a, b, c];
                    for order in permutations(&[0, 1, 2]) {
                        let statuses: Vec<_> = order.iter().map(|&h| assigned[h]).collect();
                        let picked = select_best(&statuses);
                        assert_eq!(picked, expected(&statuses), "statuses {statuses:?}");
                        checked += 1;
                    }
                }
            }
        }
        assert_eq!(checked, 27 * 6);
    }

    #[test]
    fn playing_beats_earlier_paused() {
        assert_eq!(select_best(&[Paused, Stopped, Playing]), Some(2));
        assert_eq!(select_best(&[Stopped, Paused, Paused]), Some(1));
        assert_eq!(select_best(&[Stopped, Stopped]), Some(0));
        assert_eq!(select_best(&[Playing, Playing]), Some(0));
    }
}
