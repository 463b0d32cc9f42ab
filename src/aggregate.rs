use std::cmp::Reverse;

use crate::release::ReleaseRecord;

/// Concatenate per-product sequences and sort by date, newest first.
/// The sort is stable: equal dates keep concatenation order.
pub fn aggregate<I>(per_product: I) -> Vec<ReleaseRecord>
where
    I: IntoIterator<Item = Vec<ReleaseRecord>>,
{
    let mut dataset: Vec<ReleaseRecord> = per_product.into_iter().flatten().collect();
    dataset.sort_by_key(|r| Reverse(r.date));
    dataset
}

/// Records of a single product, order preserved.
pub fn filter_product<'a>(
    dataset: &'a [ReleaseRecord],
    product: &'a str,
) -> impl Iterator<Item = &'a ReleaseRecord> + 'a {
    dataset.iter().filter(move |r| r.product == product)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::ReleaseKind;
    use chrono::NaiveDate;

    fn rec(product: &str, y: i32, m: u32, d: u32, kind: ReleaseKind) -> ReleaseRecord {
        ReleaseRecord {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            release_kind: kind,
            description: format!("{product} {y}-{m}-{d}"),
            product: product.into(),
        }
    }

    fn key(r: &ReleaseRecord) -> (String, String) {
        (r.date.to_string(), r.product.clone())
    }

    #[test]
    fn two_products_interleave_by_date() {
        let a = vec![
            rec("A", 2023, 1, 5, ReleaseKind::Fix),
            rec("A", 2023, 2, 1, ReleaseKind::Feature),
        ];
        let b = vec![rec("B", 2023, 1, 20, ReleaseKind::Change)];
        let out = aggregate([a, b]);
        let keys: Vec<_> = out.iter().map(key).collect();
        assert_eq!(
            keys,
            [
                ("2023-02-01".to_string(), "A".to_string()),
                ("2023-01-20".to_string(), "B".to_string()),
                ("2023-01-05".to_string(), "A".to_string()),
            ]
        );
    }

    #[test]
    fn order_of_products_does_not_matter() {
        let a = vec![
            rec("A", 2022, 3, 1, ReleaseKind::Fix),
            rec("A", 2021, 7, 9, ReleaseKind::Issue),
        ];
        let b = vec![rec("B", 2022, 1, 1, ReleaseKind::Fix)];
        let c = vec![
            rec("C", 2023, 5, 5, ReleaseKind::Announcement),
            rec("C", 2020, 1, 2, ReleaseKind::Change),
        ];
        let abc: Vec<_> = aggregate([a.clone(), b.clone(), c.clone()]).iter().map(key).collect();
        let cba: Vec<_> = aggregate([c.clone(), b.clone(), a.clone()]).iter().map(key).collect();
        // associativity: aggregate an already-aggregated pair with the third
        let nested: Vec<_> = aggregate([aggregate([b, c]), a]).iter().map(key).collect();
        assert_eq!(abc, cba);
        assert_eq!(abc, nested);
    }

    #[test]
    fn nothing_dropped_or_duplicated() {
        let a = vec![rec("A", 2023, 1, 1, ReleaseKind::Fix); 3];
        let b = vec![rec("B", 2023, 1, 1, ReleaseKind::Fix); 2];
        let out = aggregate([a, Vec::new(), b]);
        assert_eq!(out.len(), 5);
        assert_eq!(filter_product(&out, "A").count(), 3);
        assert_eq!(filter_product(&out, "B").count(), 2);
    }

    #[test]
    fn filtering_reproduces_product_sequence() {
        let a = vec![
            rec("A", 2021, 1, 1, ReleaseKind::Fix),
            rec("A", 2023, 6, 1, ReleaseKind::Feature),
            rec("A", 2022, 6, 1, ReleaseKind::Change),
        ];
        let b = vec![rec("B", 2022, 12, 1, ReleaseKind::Issue)];
        let out = aggregate([a.clone(), b]);
        let filtered: Vec<ReleaseRecord> = filter_product(&out, "A").cloned().collect();
        assert_eq!(filtered, aggregate([a]));
    }

    #[test]
    fn empty_inputs() {
        assert!(aggregate(Vec::<Vec<ReleaseRecord>>::new()).is_empty());
        assert!(aggregate([Vec::new(), Vec::new()]).is_empty());
    }
}
