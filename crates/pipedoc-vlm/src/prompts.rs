//! Extraction prompt templates.
//!
//! Each prompt pins the exact JSON schema the recovery parser and the
//! page-record types expect. Keep schema changes in lockstep with
//! `pipedoc_core::bom` and the legend harvester.

/// Drawing-pass prompt for one isometric page. Appends the legend reference
/// block when available.
#[must_use]
pub fn drawing_analysis_prompt(page_num: u32, symbol_ref: Option<&str>) -> String {
    let mut prompt = DRAWING_ANALYSIS_TEMPLATE.replace("{page_num}", &page_num.to_string());
    if let Some(reference) = symbol_ref {
        if !reference.is_empty() {
            prompt.push_str("\n\nREFERENCE SYMBOLS from P&ID Legend:\n");
            prompt.push_str(reference);
        }
    }
    prompt
}

/// Table-pass prompt for one isometric page; page 1 uses the cover sheet's
/// simpler column layout.
#[must_use]
pub fn table_analysis_prompt(page_num: u32) -> String {
    if page_num == 1 {
        TABLE_ANALYSIS_PAGE1.to_string()
    } else {
        TABLE_ANALYSIS_TEMPLATE.replace("{page_num}", &page_num.to_string())
    }
}

/// Legend-page analysis prompt.
#[must_use]
pub fn legend_analysis_prompt() -> &'static str {
    LEGEND_ANALYSIS_PROMPT
}

/// P&ID sheet analysis prompt with the legend reference block inlined.
#[must_use]
pub fn pid_page_analysis_prompt(page_num: u32, symbol_reference: &str) -> String {
    PID_PAGE_ANALYSIS_TEMPLATE
        .replace("{page_num}", &page_num.to_string())
        .replace("{symbol_reference}", symbol_reference)
}

const DRAWING_ANALYSIS_TEMPLATE: &str = r#"You are an expert marine/plant piping engineer. Analyze this piping isometric drawing (page {page_num}).

The LEFT side shows the isometric pipe routing with:
- Pipe piece IDs in RED text (format: PGxxx-n, e.g. PG119-1, PG101-3)
- Weld points marked as small circles or triangles (numbered W1, W2... for shop welds, FFW1, FFW2... for field-fit welds)
- Dimension annotations in mm between weld points
- Component symbols for valves, elbows, tees, reducers, flanges
- Items marked "(Loose)" are shipped separately

The RIGHT side has the BOM table and title block (analyzed separately - you can skip the table).

Return a JSON object with this EXACT structure:
{
  "page": {page_num},
  "drawing_number": "number from title block bottom-right (format: X-125.629.XXX)",
  "pipe_group": "main pipe group from drawing (e.g. PG101, PG119, PG120)",
  "line_no": "LINE NO. from title block (e.g. 101, 119, 120)",
  "pipe_no": "PIPE NO. from title block (e.g. 6_S1-1, G_D4-3)",
  "line_description": "title from title block (e.g. SUCTION LINE 1ST STAGE (INLET))",
  "pipe_pieces": [
    {"id": "PG101-1", "size": "6\"", "schedule": "Sch80S", "material": "SS304"}
  ],
  "components": [
    {
      "type": "valve|fitting|flange|reducer|support|instrument",
      "subtype": "gate|globe|ball|check|butterfly|needle|non_return|elbow_90|elbow_45|elbow_90_lr|tee|reducing_tee|reducer_con|reducer_ecc|wn_flange|blind_flange|orifice_flange|sockolet|weldolet|coupling|cap|clamp|support",
      "size": "size in inches",
      "description": "full description",
      "tag": "tag number if visible",
      "quantity": 1
    }
  ],
  "weld_points": [
    {"id": "W1", "type": "shop_weld"},
    {"id": "FFW1", "type": "field_fit_weld"}
  ],
  "dimensions_mm": [
    {"from_point": "W1", "to_point": "W2", "length_mm": 500, "direction": "horizontal|vertical|angled"}
  ],
  "total_weld_count": 16,
  "shop_weld_count": 14,
  "field_weld_count": 2,
  "has_loose_parts": false,
  "notes": "revision notes visible on drawing",
  "confidence": 0.95
}

RULES:
1. Read EVERY red pipe piece ID (PGxxx-n format) from the drawing
2. Count ALL weld symbols precisely: W# = shop weld (circle), FFW# = field fit weld (triangle)
3. Read ALL dimension numbers in mm between weld points
4. Identify component symbols: elbows (curved), tees (T-junction), reducers (tapered), flanges (thick bar), valves (special symbols)
5. Check for "(Loose)" annotations on any components
6. Return ONLY valid JSON"#;

const TABLE_ANALYSIS_TEMPLATE: &str = r#"You are an expert at reading piping isometric BOM tables.

This is the BOM TABLE AREA from page {page_num} of a piping isometric drawing.

The table has THREE distinct sections. Read them ALL separately:

## SECTION 1: BOM ITEMS TABLE (top section)
Column headers (left to right):
  N | QUANT | FIT DESCRIPTION / STANDARD/CODE | DIMENSION / MATERIAL | WEIGHT

Each BOM row has a LETTER CODE (A, B, C, D, E, F, G, H, etc.) in the description.
Common letter codes:
- A = Main PIPE (SMLS = seamless, e.g. "A PIPE SMLS ASME B36.19M")
- B = Branch/secondary PIPE
- C = TEE or REDUCING TEE (ASME B16.9)
- D = REDUCER (CONCENTRIC or ECCENTRIC, ASME B16.9)
- E = SOCKOLET or WELDOLET (ASME B16.11)
- F = WN FLANGE RF (Welding Neck Raised Face, ASME B16.5)
- G, H = Additional flanges or fittings
- M, N = WN FLANGE, BLIND FLANGE, ORIFICE FLANGE (ASME B16.5)
- O, P = SPIRAL WOUND GASKET (ASME B16.20)
- Q, R = STUD BOLT (ASME B18.2.1)
- S = CLAMP (pipe support)
- T = NUT (ASME B18.2.2)

## SECTION 2: CUT LENGTHS TABLE (middle section)
Header: LENGTH | CUT / NO.
Rows format: "XXX MM" with cut number "<1>", "<2>", etc.
Example: "736 MM <1>", "94 MM <2>", "729 MM <3>"
These are individual pipe piece cut lengths for fabrication.

## SECTION 3: TITLE BLOCK (bottom section)
Contains: Company, Project, Line description (e.g. DISCHARGE LINE 4TH STAGE),
LINE NO., PIPE NO., Drawing number (1-125.629.XXX), Revision

Return this EXACT JSON structure:
{
  "page": {page_num},
  "table_headers": ["N", "QUANT", "FIT DESCRIPTION/STANDARD", "DIMENSION/MATERIAL", "WEIGHT"],
  "bom_items": [
    {
      "letter_code": "A",
      "quantity": "9.5 M",
      "size_inches": "6\"",
      "description": "PIPE SMLS ASME B36.19M",
      "material_spec": "6\" Sch-d 80S A312 TP304/304L",
      "weight_kg": 491,
      "remarks": ""
    }
  ],
  "cut_lengths": [
    {"cut_no": 1, "length_mm": 736},
    {"cut_no": 2, "length_mm": 94}
  ],
  "drawing_info": {
    "drawing_number": "1-125.629.XXX",
    "revision": "E",
    "date": "15-01-2025",
    "scale": "",
    "project": "",
    "line_description": "DISCHARGE LINE 4TH STAGE (OUTLET)",
    "line_no": "120",
    "pipe_no": "G_D4-3"
  },
  "bom_totals": {
    "total_weight_kg": 1295,
    "total_pipe_length_m": 9.5
  }
}

CRITICAL RULES:
1. BOM items and CUT LENGTHS are SEPARATE sections - do NOT mix them
2. Read the letter code (A, B, C...) from the start of each description
3. Read quantity carefully: pipe quantities are in meters (e.g. "9.5 M", "0.2 M"), other items are integers
4. Size is in inches (e.g. 6", 4", 3/4")
5. Material spec includes pipe schedule, ASTM grade, and material (e.g. "6\" Sch-d 80S A312 TP304/304L")
6. Weight is in kg (rightmost column)
7. Cut lengths are in MM with angle bracket numbers: "736 MM <1>"
8. Read the COMPLETE drawing number from title block (format: X-125.629.XXX)
9. Read LINE NO. and PIPE NO. from title block
10. Return ONLY valid JSON, no markdown"#;

const TABLE_ANALYSIS_PAGE1: &str = r#"You are reading a piping BOM table from page 1 of an isometric drawing package.

This page has a DIFFERENT format from other pages. It uses a simple numbered table:

Columns: ITEM | QTY | SIZE | DESCRIPTION | MATERIAL SPEC | LENGTH | WEIGHT | UNIT WT | REMARKS

Items are numbered (1, 2, 3...) and include:
- PIPE (with size and schedule)
- ELBOW 90 LR (Long Radius 90-degree elbow)
- FLANGE WN RF (Welding Neck Raised Face) with pressure class
- GASKET
- BOLT & NUT
- SUPPORT TYPE S-1, S-2 etc.
- PAINTING
- SUB TOTAL and GRAND TOTAL rows

Return this JSON:
{
  "page": 1,
  "table_headers": ["ITEM", "QTY", "SIZE", "DESCRIPTION", "MATERIAL SPEC", "LENGTH", "WEIGHT", "UNIT WT", "REMARKS"],
  "bom_items": [
    {
      "item_no": "1",
      "quantity": 1,
      "size_inches": "6\"",
      "description": "PIPE SMLS SCH 40",
      "material_spec": "A53 GR.B",
      "length_mm": 6096,
      "weight_kg": 0,
      "remarks": ""
    }
  ],
  "cut_lengths": [],
  "drawing_info": {
    "drawing_number": "0-125.629.098",
    "revision": "E",
    "date": "",
    "scale": "",
    "project": "",
    "line_description": "SUCTION LINE 1ST STAGE (INLET)",
    "line_no": "101",
    "pipe_no": "6_S1-1"
  },
  "bom_totals": {
    "total_weight_kg": 0,
    "total_pipe_length_m": 0
  }
}

RULES:
1. Read EVERY row including SUB TOTAL and GRAND TOTAL
2. Copy material specifications exactly
3. Return ONLY valid JSON"#;

const LEGEND_ANALYSIS_PROMPT: &str = r#"You are an expert P&ID (Piping and Instrumentation Diagram) engineer.
You are analyzing the LEGEND PAGE (page 1) of a P&ID drawing package for a ship/plant.

This page contains a SYMBOL LEGEND organized in columns/sections:

## SECTIONS (left to right):
1. PIPING SYMBOLS (leftmost area, split into 2 sub-columns):
   - Left sub-column: Reducers, nozzles, flanges, couplings, caps, hose connections, spectacle flanges, spades, spacers, removable spools, vents, drains, funnels, tees, sample connections, sight glass, expansion joints, bulkhead penetrations
   - Right sub-column: Strainers (temporary, conical, Y-type, T-type, basket), flame arrester, static mixer, straightening vane, air filter, mud/rose/drain boxes, liquid trap, flame/bug screens, vent heads, sounding caps, deck scuppers, silencer, bulkhead connector, quick closing valve, bellows expansion joint, self-closing valves, air release valve, hose connection valve, storm valve

2. VALVE SYMBOLS (second column) - Ball valve (open/closed/cryogenic), butterfly valve, gate valve (open/closed/with body drain), globe valve, screw down non-return valve, hose valve, lift/swing/dual flap check valves, needle valve (open/closed), angle valve, three-way valves (L-port/T-port), four-way valve, plug valve (open/closed), diaphragm valve, deluge valve, axial choke valve, split wedge gate valve (cryogenic), double block and bleed variants, foot valve, feed-through, flow control ball float

3. ACTUATORS (third column, top area) - Hand operator, diaphragm/membrane actuator, piston actuator, motor operated actuator, hydraulic operated actuator

4. ACTUATED VALVES (third column, middle area) - Instrument valve bodies section header (skip this), manual angle choke valve, control valve (general/modulating), manually control valve (general/isolating), self-contained pressure control valves (downstream/upstream variants), isolation valve (general) on/off, solenoid valves (2-way/3-way/3-way with mechanical reset/4-way), three-part hand valve

5. SAFETY DEVICE SYMBOLS (third column, bottom area) - Pressure relief/safety valves (conventional, balanced bellow, pilot) with (NOTE1), pressure/vacuum valve, rupture disc, vacuum relief valve/breaker valve

6. OTHER SYMBOLS (rightmost column) - Instrument air, flowmeters (coriolis, magnetic, venturi, vortex, turbine, positive displacement, ultrasonic in-line/clamp-on, pitot tube, averaging pitot tube, variable area), flow element orifice type with carrier, restriction orifice, dynamic variable orifice, diaphragm seal, capacitance sensor, calibration pot, horn/hooter, steam traps (regular, disc type with valve, float type)

Each symbol entry consists of:
- A SYMBOL GRAPHIC (small technical drawing/icon) on the LEFT side
- A DESCRIPTION TEXT on the RIGHT side (e.g., "BALL VALVE (OPEN)", "GATE VALVE (CLOSED)")

## YOUR TASK:
Extract EVERY single symbol entry from ALL sections. For each symbol provide:

1. **category**: One of: PIPING, VALVE, ACTUATOR, ACTUATED_VALVE, SAFETY_DEVICE, OTHER
2. **symbol_name**: Short abbreviation/code if visible INSIDE or NEAR the symbol graphic (e.g., "TS", "F", "M", "H", "AS", "C", "V", "R"). Empty string if no code is shown.
3. **description**: Full description text exactly as written on the drawing. Read CAREFULLY - do not guess or hallucinate text.
   - "CRYOGENIC" not "OPPOSING"
   - "BUTTERFLY VALVE" not "BUTTERFLY V-ALVE"
   - "ANGLE VALVE" not "SIMPLE VALVE"
   - "THREE-WAY VALVE (L-PORT)" and "THREE-WAY VALVE (T-PORT)" as separate entries
   - "ISOLATION VALVE (GENERAL), ON/OFF" not "SELF CON VALVE"
   - "THREE PART HAND VALVE" not "THREE PART HARD VALVE"
4. **bbox_pct**: Bounding box of the SYMBOL GRAPHIC ONLY (not the description text) as [x1_pct, y1_pct, x2_pct, y2_pct] where values are fractions (0.0 to 1.0) of the full page width and height. The box should tightly enclose just the graphical symbol/icon. Be PRECISE with the bounding box - it should NOT overlap with description text.

## CRITICAL RULES:
1. Extract ALL symbols from ALL sections. Target: approximately 120-150 symbols total.
2. Multi-line descriptions MUST be merged into ONE entry. Examples:
   - "PRESSURE RELIEF/SAFETY VALVE" + "(CONVENTIONAL) (NOTE1)" → single entry: "PRESSURE RELIEF/SAFETY VALVE (CONVENTIONAL) (NOTE1)"
   - "SELF CONTAINED PRESSURE (CONTROL)" + "VALVE WITH INTERNAL IMPULSE LINE" + "(DOWNSTREAM)" → single entry
   - "SOUNDING CAP SELF CLOSING WEIGHT" + "WITH SELF CLOSING COCK" → single entry
   - "CONTROL VALVE(GENERAL)," + "MODULATING" → single entry: "CONTROL VALVE(GENERAL), MODULATING"
   - "ISOLATION VALVE (GENERAL)," + "ON/OFF" → single entry: "ISOLATION VALVE (GENERAL), ON/OFF"
3. Do NOT include section headers ("PIPING SYMBOLS", "VALVE SYMBOLS", "ACTUATORS", "INSTRUMENT VALVE BODIES", etc.)
4. Do NOT include column headers ("SYMBOL", "DESCRIPTION", "DISCRIPTION")
5. Do NOT include table grid border labels (single letters A-K, numbers 1-16)
6. Do NOT include title block text (SHIP NO., CLIENT, DRAWING NO., REV, SCALE, etc.)
7. Do NOT include "AA AA" placeholder text or "NN" dimension placeholders
8. For each valve that has OPEN and CLOSED variants, create SEPARATE entries for each.
9. For "DOUBLE BLOCK AND BLEED" variants (general, ball valve, needle valve, plug valve, integrated), create SEPARATE entries.
10. The bbox_pct should cover ONLY the graphic symbol area to the LEFT of the description text.

Return ONLY a valid JSON array (no markdown fences, no commentary):
[
  {"category": "PIPING", "symbol_name": "TS", "description": "TEMPORARY STRAINER", "bbox_pct": [0.02, 0.06, 0.08, 0.08]},
  {"category": "VALVE", "symbol_name": "", "description": "BALL VALVE (OPEN)", "bbox_pct": [0.23, 0.06, 0.30, 0.08]},
  ...
]"#;

const PID_PAGE_ANALYSIS_TEMPLATE: &str = r#"You are an expert P&ID (Piping and Instrumentation Diagram) engineer.
You are analyzing page {page_num} of a P&ID drawing for a ship's pump room piping system.

## REFERENCE SYMBOL LIBRARY (from the legend page):
{symbol_reference}

## YOUR TASK:
Carefully analyze this P&ID drawing page and extract ALL of the following:

### 1. LINE SPECIFICATION TAGS
Find EVERY pipe line specification tag visible on the drawing. They follow the format:
SIZE"-SYSTEM_CODE-LINE_NUMBER-PIPING_CLASS-SCHEDULE#PRESSURE_RATING-MATERIAL_CODE

Examples:
- 10"-CSW-9103-CS3-40#150-NI
- 12"-CSW-9112-CS3-STD#150-NI
- 8"-SSW-9201-CS3-40#150-NI
- 6"-CFW-8101-CS2-STD#150-NI

Parse each into components:
- size: pipe diameter in inches (e.g., "10")
- system_code: "CSW" (Cooling Sea Water), "SSW" (Spray Sea Water), "CFW" (Cooling Fresh Water), "FW" (Fresh Water)
- line_number: 4-digit number (e.g., "9103")
- tag: system_code + line_number (e.g., "CSW9103")
- piping_class: "CS3", "CS2", "SS2", etc.
- schedule: "40", "STD", "80", "XS", etc.
- pressure_rating: "150" (from #150)
- material_code: "NI" or other code

### 2. ALL VALVES
Identify EVERY valve on the drawing with:
- tag: the valve tag number (e.g., CSW9112, FCV1234, TCV5678)
- valve_type: from the symbol library (BUTTERFLY, GATE, GLOBE, CHECK, BALL, PLUG, NEEDLE, CONTROL)
- valve_subtype: more specific type (e.g., "BUTTERFLY VALVE", "GATE VALVE (OPEN)", "CHECK VALVE")
- actuator: type of actuator if visible (MANUAL, DIAPHRAGM, PISTON, MOTOR, HYDRAULIC, NONE)
- size: valve size in inches
- associated line_spec: the full line spec string this valve is on
- description: brief description of the valve's function

### 3. PIPE SYMBOLS AND FITTINGS
Identify piping symbols like:
- Strainers, screens, vents, drains
- Expansion joints, sounding caps
- Tees, reducers, elbows
- Flanges
- Equipment connections

### 4. EQUIPMENT
List major equipment visible (pumps, heat exchangers, tanks, sea chests, etc.)

Return ONLY valid JSON:
{
  "page": {page_num},
  "line_specs": [
    {
      "full_spec": "10\"-CSW-9103-CS3-40#150-NI",
      "size": "10",
      "system_code": "CSW",
      "line_number": "9103",
      "tag": "CSW9103",
      "piping_class": "CS3",
      "schedule": "40",
      "pressure_rating": "150",
      "material_code": "NI",
      "fluid": "SW"
    }
  ],
  "valves": [
    {
      "tag": "CSW9112",
      "valve_type": "BUTTERFLY",
      "valve_subtype": "BUTTERFLY VALVE",
      "actuator": "MANUAL",
      "size": "12",
      "line_spec": "12\"-CSW-9112-CS3-STD#150-NI",
      "piping_class": "CS3",
      "schedule": "STD",
      "pressure_rating": "150",
      "material_code": "NI",
      "fluid": "SW",
      "description": "Main CSW pump suction valve"
    }
  ],
  "symbols_found": [
    {
      "category": "PIPING",
      "symbol_description": "TEMPORARY STRAINER",
      "tag": "",
      "associated_line": "CSW9103",
      "size": "10"
    }
  ],
  "equipment": [
    {
      "name": "NO.2 FWD CSW PUMP",
      "type": "pump",
      "connections": ["CSW9103", "CSW9105"]
    }
  ],
  "confidence": 0.90
}

CRITICAL RULES:
1. Extract EVERY line spec tag visible on the drawing - do not miss any
2. The tag is formed by concatenating system_code + line_number (e.g., CSW + 9103 = CSW9103)
3. Identify valve types by matching to the REFERENCE SYMBOL LIBRARY provided above
4. Read ALL text annotations, especially those near valves and pipe lines
5. Return ONLY valid JSON, no markdown"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drawing_prompt_substitutes_page_and_reference() {
        let prompt = drawing_analysis_prompt(7, Some("### VALVE\n  - BALL VALVE"));
        assert!(prompt.contains("page 7"));
        assert!(prompt.contains("\"page\": 7"));
        assert!(prompt.contains("REFERENCE SYMBOLS from P&ID Legend"));
        assert!(!prompt.contains("{page_num}"));

        let bare = drawing_analysis_prompt(7, None);
        assert!(!bare.contains("REFERENCE SYMBOLS"));
    }

    #[test]
    fn page_one_table_prompt_uses_cover_layout() {
        assert!(table_analysis_prompt(1).contains("item_no"));
        assert!(table_analysis_prompt(2).contains("letter_code"));
        assert!(table_analysis_prompt(2).contains("page 2"));
    }

    #[test]
    fn pid_prompt_inlines_reference() {
        let prompt = pid_page_analysis_prompt(3, "### PIPING\n  - TS: TEMPORARY STRAINER");
        assert!(prompt.contains("page 3"));
        assert!(prompt.contains("TEMPORARY STRAINER"));
        assert!(!prompt.contains("{symbol_reference}"));
    }
}
