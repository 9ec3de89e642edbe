//! Code-page id bookkeeping.
//!
//! The grouping of code pages into the 18 bundled `EGA*.CPX` files follows
//! the FreeDOS CPIDOS distribution; `"auto"` code-page selection and the
//! bundled-blob fallback both go through this table.

/// The code page installed at power-on (US).
pub const DEFAULT_CODEPAGE: u16 = 437;

/// Canonical file names of the bundled code-page archives.
pub const EGA_CPX_FILES: [&str; 18] = [
    "EGA.CPX", "EGA2.CPX", "EGA3.CPX", "EGA4.CPX", "EGA5.CPX", "EGA6.CPX",
    "EGA7.CPX", "EGA8.CPX", "EGA9.CPX", "EGA10.CPX", "EGA11.CPX", "EGA12.CPX",
    "EGA13.CPX", "EGA14.CPX", "EGA15.CPX", "EGA16.CPX", "EGA17.CPX", "EGA18.CPX",
];

/// Returns the bundled archive index (0..17) providing `codepage_id`, or
/// `None` when no bundled file carries the page.
pub fn cpx_file_id(codepage_id: u16) -> Option<u8> {
    let id = match codepage_id {
        437 | 850 | 852 | 853 | 857 | 858 => 0,
        775 | 859 | 1116 | 1117 | 1118 | 1119 => 1,
        771 | 772 | 808 | 855 | 866 | 872 => 2,
        848 | 849 | 1125 | 1131 | 3012 | 30010 => 3,
        113 | 737 | 851 | 869 => 4,
        899 | 30008 | 58210 | 59829 | 60258 | 60853 => 5,
        30011 | 30013 | 30014 | 30017 | 30018 | 30019 => 6,
        770 | 773 | 774 | 777 | 778 => 7,
        860 | 861 | 863 | 865 | 867 => 8,
        667 | 668 | 790 | 991 | 3845 => 9,
        30000 | 30001 | 30004 | 30007 | 30009 => 10,
        30003 | 30029 | 30030 | 58335 => 11,
        895 | 30002 | 58152 | 59234 | 62306 => 12,
        30006 | 30012 | 30015 | 30016 | 30020 | 30021 => 13,
        30023 | 30024 | 30025 | 30026 | 30027 | 30028 => 14,
        3021 | 30005 | 30022 | 30031 | 30032 => 15,
        862 | 864 | 30033 | 30034 | 30039 | 30040 => 16,
        856 | 3846 | 3848 => 17,
        _ => return None,
    };
    Some(id)
}

/// File name of the bundled archive providing `codepage_id`.
pub fn codepage_file_for(codepage_id: u16) -> Option<&'static str> {
    cpx_file_id(codepage_id).map(|id| EGA_CPX_FILES[id as usize])
}
